//! Amazon GameLift Streams client built on the AWS SDK

use std::time::Duration;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_gameliftstreams::config::http::HttpResponse;
use aws_sdk_gameliftstreams::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_gameliftstreams::types::{Protocol, StreamSessionStatus as SdkStatus};
use aws_sdk_gameliftstreams::Client;
use tracing::{debug, warn};

use super::{
    ProviderError, StartSessionRequest, StartedSession, StreamProvider, StreamSessionState,
    StreamSessionStatus,
};
use crate::config::ProviderConfig;

/// GameLift Streams client
///
/// Credentials, retries and backoff come from the SDK. The default chain
/// covers environment variables, shared profiles, SSO and container or
/// instance roles.
#[derive(Clone, Debug)]
pub struct GameLiftStreamsClient {
    client: Client,
}

impl GameLiftStreamsClient {
    /// Resolve the shared AWS configuration and build a client for `config`
    pub async fn from_config(config: &ProviderConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts.max(1)))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_attempt_timeout(Duration::from_secs(config.request_timeout_secs))
                    .build(),
            );
        if let Some(endpoint) = config.endpoint_override() {
            debug!("GameLift Streams endpoint override: {}", endpoint);
            loader = loader.endpoint_url(endpoint);
        }

        Self::from_sdk_config(&loader.load().await)
    }

    pub fn from_sdk_config(sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn sdk_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let mapped = match &err {
        SdkError::ServiceError(service) => {
            let e = service.err();
            ProviderError::Api {
                status: service.raw().status().as_u16(),
                code: e.code().unwrap_or("UnknownError").to_string(),
                message: e
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| DisplayErrorContext(&err).to_string()),
            }
        }
        _ => ProviderError::Transport(DisplayErrorContext(&err).to_string()),
    };
    warn!("GameLift Streams {} failed: {}", operation, mapped);
    mapped
}

fn to_i32(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn status_of(status: Option<&SdkStatus>) -> StreamSessionStatus {
    status
        .map(|s| StreamSessionStatus::from_wire(s.as_str()))
        .unwrap_or(StreamSessionStatus::Unknown)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

fn reason_text<R: AsRef<str> + ?Sized>(reason: Option<&R>) -> Option<String> {
    reason.map(|r| r.as_ref().to_string())
}

// Output members are `Option` or plain references depending on whether the
// service model marks them required; `Option::from` accepts both.

#[async_trait]
impl StreamProvider for GameLiftStreamsClient {
    async fn start_stream_session(
        &self,
        request: StartSessionRequest,
    ) -> Result<StartedSession, ProviderError> {
        let mut call = self
            .client
            .start_stream_session()
            .identifier(&request.stream_group)
            .application_identifier(&request.application_id)
            .protocol(Protocol::from("WebRTC"))
            .signal_request(&request.signal_request)
            .client_token(uuid::Uuid::new_v4().to_string())
            .connection_timeout_seconds(to_i32(request.connection_timeout_secs))
            .set_user_id(request.user_id.clone());
        if !request.locations.is_empty() {
            call = call.set_locations(Some(request.locations.clone()));
        }
        if !request.launch_args.is_empty() {
            call = call.set_additional_launch_args(Some(request.launch_args.clone()));
        }
        if !request.environment.is_empty() {
            call = call.set_additional_environment_variables(Some(
                request.environment.clone().into_iter().collect(),
            ));
        }
        if let Some(secs) = request.session_length_secs {
            call = call.session_length_seconds(to_i32(secs));
        }

        debug!(
            "GameLift Streams StartStreamSession on {} for {}",
            request.stream_group, request.application_id
        );
        let output = call
            .send()
            .await
            .map_err(|e| sdk_error("StartStreamSession", e))?;

        let arn = non_empty(Option::<&str>::from(output.arn()))
            .ok_or_else(|| ProviderError::InvalidResponse("missing Arn".to_string()))?;
        let status = match Option::<&SdkStatus>::from(output.status()) {
            Some(status) => status_of(Some(status)),
            None => StreamSessionStatus::Activating,
        };

        Ok(StartedSession { arn, status })
    }

    async fn get_stream_session(
        &self,
        stream_group: &str,
        session_arn: &str,
    ) -> Result<StreamSessionState, ProviderError> {
        let output = self
            .client
            .get_stream_session()
            .identifier(stream_group)
            .stream_session_identifier(session_arn)
            .send()
            .await
            .map_err(|e| sdk_error("GetStreamSession", e))?;

        Ok(StreamSessionState {
            arn: non_empty(Option::<&str>::from(output.arn()))
                .unwrap_or_else(|| session_arn.to_string()),
            status: status_of(Option::<&SdkStatus>::from(output.status())),
            signal_response: non_empty(Option::<&str>::from(output.signal_response()))
                .unwrap_or_default(),
            status_reason: reason_text(output.status_reason()),
        })
    }

    async fn create_stream_session_connection(
        &self,
        stream_group: &str,
        session_arn: &str,
        signal_request: &str,
    ) -> Result<String, ProviderError> {
        let output = self
            .client
            .create_stream_session_connection()
            .identifier(stream_group)
            .stream_session_identifier(session_arn)
            .signal_request(signal_request)
            .client_token(uuid::Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(|e| sdk_error("CreateStreamSessionConnection", e))?;

        non_empty(Option::<&str>::from(output.signal_response()))
            .ok_or_else(|| ProviderError::InvalidResponse("missing SignalResponse".to_string()))
    }

    async fn terminate_stream_session(
        &self,
        stream_group: &str,
        session_arn: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .terminate_stream_session()
            .identifier(stream_group)
            .stream_session_identifier(session_arn)
            .send()
            .await
            .map_err(|e| sdk_error("TerminateStreamSession", e))?;
        Ok(())
    }
}
