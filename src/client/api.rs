use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::signaling::{SignalingApi, StreamRequest};
use super::{ClientError, ClientResult};

/// Gateway client over HTTP
#[derive(Clone)]
pub struct HttpSignalingApi {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_group_id: Option<&'a str>,
    app_identifier: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    signal_request: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    regions: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    additional_launch_args: &'a [String],
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    additional_environment_variables: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TokenBody<'a> {
    token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    signal_request: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TokenReply {
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SignalReply {
    #[serde(default)]
    signal_response: String,
}

#[derive(Deserialize)]
struct ErrorReply {
    #[serde(default)]
    message: String,
}

impl HttpSignalingApi {
    pub fn new(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        operation: &str,
        body: &B,
    ) -> ClientResult<T> {
        let url = format!("{}/api/{}", self.base_url, operation);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("{} failed: {}", operation, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound);
        }
        if !status.is_success() {
            let message = response
                .json::<ErrorReply>()
                .await
                .map(|e| e.message)
                .unwrap_or_default();
            return Err(ClientError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Transport(format!("Invalid {} response: {}", operation, e)))
    }
}

#[async_trait]
impl SignalingApi for HttpSignalingApi {
    async fn create_stream_session(
        &self,
        request: &StreamRequest,
        signal_request: &str,
    ) -> ClientResult<String> {
        let body = CreateBody {
            stream_group_id: request.stream_group.as_deref(),
            app_identifier: &request.app_identifier,
            user_id: request.user_id.as_deref(),
            signal_request,
            regions: &request.regions,
            additional_launch_args: &request.launch_args,
            additional_environment_variables: &request.environment,
        };
        let reply: TokenReply = self.post("CreateStreamSession", &body).await?;
        Ok(reply.token)
    }

    async fn get_signal_response(&self, token: &str) -> ClientResult<String> {
        let body = TokenBody {
            token,
            signal_request: None,
        };
        let reply: SignalReply = self.post("GetSignalResponse", &body).await?;
        Ok(reply.signal_response)
    }

    async fn reconnect_stream_session(
        &self,
        token: &str,
        signal_request: &str,
    ) -> ClientResult<String> {
        let body = TokenBody {
            token,
            signal_request: Some(signal_request),
        };
        let reply: SignalReply = self.post("ReconnectStreamSession", &body).await?;
        Ok(reply.signal_response)
    }

    async fn destroy_stream_session(&self, token: &str) -> ClientResult<()> {
        let body = TokenBody {
            token,
            signal_request: None,
        };
        let _: serde_json::Value = self.post("DestroyStreamSession", &body).await?;
        Ok(())
    }
}
