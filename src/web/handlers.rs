use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::CreateSession;
use crate::state::AppState;

// ============================================================================
// Health
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Stream sessions
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateStreamSessionRequest {
    #[serde(default, alias = "streamGroupId")]
    pub stream_group_id: Option<String>,
    #[serde(default, alias = "appIdentifier")]
    pub app_identifier: String,
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
    #[serde(default, alias = "signalRequest")]
    pub signal_request: String,
    #[serde(default, alias = "regions")]
    pub regions: Vec<String>,
    #[serde(default, alias = "additionalLaunchArgs")]
    pub additional_launch_args: Vec<String>,
    #[serde(default, alias = "additionalEnvironmentVariables")]
    pub additional_environment_variables: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenRequest {
    #[serde(default, alias = "token")]
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReconnectStreamSessionRequest {
    #[serde(default, alias = "token")]
    pub token: String,
    #[serde(default, alias = "signalRequest")]
    pub signal_request: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignalResponse {
    pub signal_response: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmptyResponse {}

/// Start a stream session and hand back its connection token
pub async fn create_stream_session(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<CreateStreamSessionRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>> {
    let Json(req) = payload?;
    let token = state
        .sessions
        .create(CreateSession {
            stream_group: req.stream_group_id,
            application_id: req.app_identifier,
            user_id: req.user_id,
            signal_request: req.signal_request,
            regions: req.regions,
            launch_args: req.additional_launch_args,
            environment: req.additional_environment_variables,
        })
        .await?;

    Ok(Json(TokenResponse { token }))
}

/// Poll for the signal answer; empty while the session is activating
pub async fn get_signal_response(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<SignalResponse>> {
    let Json(req) = payload?;
    let signal_response = state.sessions.poll_signal(&req.token).await?;
    Ok(Json(SignalResponse { signal_response }))
}

pub async fn reconnect_stream_session(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ReconnectStreamSessionRequest>, JsonRejection>,
) -> Result<Json<SignalResponse>> {
    let Json(req) = payload?;
    let signal_response = state
        .sessions
        .reconnect(&req.token, &req.signal_request)
        .await?;
    Ok(Json(SignalResponse { signal_response }))
}

pub async fn destroy_stream_session(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<EmptyResponse>> {
    let Json(req) = payload?;
    state.sessions.destroy(&req.token).await?;
    Ok(Json(EmptyResponse {}))
}
