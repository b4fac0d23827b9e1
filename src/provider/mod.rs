//! Streaming provider client
//!
//! The gateway never orchestrates media itself. Every session operation is
//! delegated to a [`StreamProvider`], which in production is the Amazon
//! GameLift Streams SDK client ([`GameLiftStreamsClient`]).
//!
//! ```text
//! Lifecycle service
//!        |
//!        v
//! StreamProvider (trait)
//!        |
//!        +--> GameLiftStreamsClient --(aws-sdk-gameliftstreams)--> GameLift Streams
//!        |
//!        +--> MockProvider (tests)
//! ```

mod gamelift;

#[cfg(test)]
pub mod mock;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;

pub use gamelift::GameLiftStreamsClient;

/// Provider-side status of a stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamSessionStatus {
    Activating,
    Active,
    Connected,
    PendingClientReconnection,
    Reconnecting,
    Terminating,
    Terminated,
    Error,
    /// Any status this build does not know about
    #[serde(other)]
    Unknown,
}

impl StreamSessionStatus {
    /// Map the provider's wire name; unknown names become [`Self::Unknown`]
    pub fn from_wire(name: &str) -> Self {
        match name {
            "ACTIVATING" => Self::Activating,
            "ACTIVE" => Self::Active,
            "CONNECTED" => Self::Connected,
            "PENDING_CLIENT_RECONNECTION" => Self::PendingClientReconnection,
            "RECONNECTING" => Self::Reconnecting,
            "TERMINATING" => Self::Terminating,
            "TERMINATED" => Self::Terminated,
            "ERROR" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for StreamSessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Activating => "ACTIVATING",
            Self::Active => "ACTIVE",
            Self::Connected => "CONNECTED",
            Self::PendingClientReconnection => "PENDING_CLIENT_RECONNECTION",
            Self::Reconnecting => "RECONNECTING",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Parameters for starting a new stream session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartSessionRequest {
    /// Stream group the session is placed on
    pub stream_group: String,
    /// Application to launch
    pub application_id: String,
    /// Opaque end-user identifier
    pub user_id: Option<String>,
    /// Client WebRTC offer
    pub signal_request: String,
    /// Preferred locations, in priority order
    pub locations: Vec<String>,
    /// Extra command line arguments for the application
    pub launch_args: Vec<String>,
    /// Extra environment variables for the application
    pub environment: BTreeMap<String, String>,
    /// Seconds the provider waits for the client to connect
    pub connection_timeout_secs: u64,
    /// Maximum session length in seconds
    pub session_length_secs: Option<u64>,
}

/// Result of a successful start call
#[derive(Debug, Clone, PartialEq)]
pub struct StartedSession {
    /// Session ARN used for all follow-up calls
    pub arn: String,
    pub status: StreamSessionStatus,
}

/// Snapshot of a stream session
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSessionState {
    pub arn: String,
    pub status: StreamSessionStatus,
    /// WebRTC answer; empty until the session is active
    pub signal_response: String,
    pub status_reason: Option<String>,
}

/// Provider call failure
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{code} ({status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        AppError::Provider(err.to_string())
    }
}

/// Remote streaming service operations
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Start a stream session and hand the provider the client's offer
    async fn start_stream_session(
        &self,
        request: StartSessionRequest,
    ) -> Result<StartedSession, ProviderError>;

    /// Fetch current status (and, once active, the signal answer)
    async fn get_stream_session(
        &self,
        stream_group: &str,
        session_arn: &str,
    ) -> Result<StreamSessionState, ProviderError>;

    /// Open a fresh connection to an existing session; returns the answer
    async fn create_stream_session_connection(
        &self,
        stream_group: &str,
        session_arn: &str,
        signal_request: &str,
    ) -> Result<String, ProviderError>;

    /// Terminate a session
    async fn terminate_stream_session(
        &self,
        stream_group: &str,
        session_arn: &str,
    ) -> Result<(), ProviderError>;
}
