//! Stream session lifecycle
//!
//! Create, poll, reconnect and destroy. Each token moves through
//! `absent -> active -> absent`; the brief window while a terminate call is
//! in flight is not stored.
//!
//! Authorization is possession of the token. Anyone holding it can poll,
//! reconnect or destroy the session.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{generate_token, SessionRecord, SessionStore};
use crate::config::{AppConfig, DeploymentMode};
use crate::error::{AppError, Result};
use crate::provider::{StartSessionRequest, StreamProvider, StreamSessionStatus};

/// Fixed lifecycle settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub deployment: DeploymentMode,
    /// Stream group from deployment configuration
    pub default_stream_group: Option<String>,
    /// Absolute token lifetime, also the provider connection timeout
    pub connection_timeout: Duration,
    pub session_length_secs: Option<u64>,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            deployment: config.deployment,
            default_stream_group: config.provider.stream_group_id.clone(),
            connection_timeout: Duration::from_secs(config.session.connection_timeout_secs),
            session_length_secs: config.session.session_length_secs,
        }
    }
}

/// Input for starting a stream
#[derive(Debug, Clone, Default)]
pub struct CreateSession {
    pub stream_group: Option<String>,
    pub application_id: String,
    pub user_id: Option<String>,
    pub signal_request: String,
    pub regions: Vec<String>,
    pub launch_args: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

/// Session lifecycle service
pub struct SessionService {
    provider: Arc<dyn StreamProvider>,
    store: Arc<dyn SessionStore>,
    settings: SessionSettings,
    /// Cancels per-token expiry timers on shutdown
    shutdown: CancellationToken,
}

impl SessionService {
    pub fn new(
        provider: Arc<dyn StreamProvider>,
        store: Arc<dyn SessionStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            provider,
            store,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Token that fires when the service shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop all background timers owned by the service
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Start a stream and issue a token for it
    pub async fn create(&self, request: CreateSession) -> Result<String> {
        if request.signal_request.trim().is_empty() {
            return Err(AppError::BadRequest("SignalRequest is required".to_string()));
        }
        if request.application_id.trim().is_empty() {
            return Err(AppError::BadRequest("AppIdentifier is required".to_string()));
        }
        let stream_group = self.resolve_stream_group(request.stream_group.as_deref())?;

        let started = self
            .provider
            .start_stream_session(StartSessionRequest {
                stream_group: stream_group.clone(),
                application_id: request.application_id,
                user_id: request.user_id,
                signal_request: request.signal_request,
                locations: request.regions,
                launch_args: request.launch_args,
                environment: request.environment,
                connection_timeout_secs: self.settings.connection_timeout.as_secs(),
                session_length_secs: self.settings.session_length_secs,
            })
            .await?;

        let token = generate_token();
        self.store
            .put(SessionRecord::new(&token, &stream_group, &started.arn))?;
        self.schedule_expiry(token.clone());

        info!(
            session_arn = %started.arn,
            stream_group = %stream_group,
            status = %started.status,
            "Stream session started"
        );
        Ok(token)
    }

    /// Return the signal answer, or an empty string while activating
    pub async fn poll_signal(&self, token: &str) -> Result<String> {
        let record = self.lookup(token)?;

        let state = self
            .provider
            .get_stream_session(&record.stream_group, &record.session_arn)
            .await?;

        match state.status {
            StreamSessionStatus::Activating => Ok(String::new()),
            StreamSessionStatus::Active => {
                debug!(session_arn = %record.session_arn, "Stream session active");
                Ok(state.signal_response)
            }
            other => {
                warn!(
                    session_arn = %record.session_arn,
                    status = %other,
                    reason = state.status_reason.as_deref().unwrap_or(""),
                    "Stream session cannot be connected"
                );
                Err(AppError::session_not_found())
            }
        }
    }

    /// Open a new connection to an existing session with a fresh offer
    pub async fn reconnect(&self, token: &str, signal_request: &str) -> Result<String> {
        if signal_request.trim().is_empty() {
            return Err(AppError::BadRequest("SignalRequest is required".to_string()));
        }
        let record = self.lookup(token)?;

        let answer = self
            .provider
            .create_stream_session_connection(
                &record.stream_group,
                &record.session_arn,
                signal_request,
            )
            .await?;

        info!(session_arn = %record.session_arn, "Stream session reconnected");
        Ok(answer)
    }

    /// Terminate the session; the token stays valid if the provider call fails
    pub async fn destroy(&self, token: &str) -> Result<()> {
        let record = self.lookup(token)?;

        self.provider
            .terminate_stream_session(&record.stream_group, &record.session_arn)
            .await?;

        // A concurrent destroy may have won the race
        match self.store.remove(token) {
            Some(_) => {
                info!(session_arn = %record.session_arn, "Stream session terminated");
                Ok(())
            }
            None => Err(AppError::session_not_found()),
        }
    }

    /// Find a live record; unknown and expired tokens are both not found
    fn lookup(&self, token: &str) -> Result<SessionRecord> {
        if token.trim().is_empty() {
            return Err(AppError::BadRequest("Token is required".to_string()));
        }

        let record = self
            .store
            .get(token)
            .ok_or_else(AppError::session_not_found)?;

        if record.is_expired(self.settings.connection_timeout) {
            self.store.remove(token);
            return Err(AppError::session_not_found());
        }

        Ok(record)
    }

    fn resolve_stream_group(&self, requested: Option<&str>) -> Result<String> {
        let requested = requested.map(str::trim).filter(|s| !s.is_empty());
        let configured = self.settings.default_stream_group.as_deref();

        match self.settings.deployment {
            DeploymentMode::Hosted => {
                let configured = configured.ok_or_else(|| {
                    AppError::Config("No stream group configured for hosted deployment".into())
                })?;
                match requested {
                    Some(group) if group != configured => Err(AppError::BadRequest(
                        "Stream group cannot be chosen in hosted deployments".to_string(),
                    )),
                    _ => Ok(configured.to_string()),
                }
            }
            DeploymentMode::Local => requested
                .or(configured)
                .map(str::to_string)
                .ok_or_else(|| AppError::BadRequest("StreamGroupId is required".to_string())),
        }
    }

    /// Drop the token after the absolute TTL, whatever its activity
    fn schedule_expiry(&self, token: String) {
        let store = self.store.clone();
        let ttl = self.settings.connection_timeout;
        let cancel = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(ttl) => {
                    if let Some(record) = store.remove(&token) {
                        debug!(session_arn = %record.session_arn, "Stream session token expired");
                    }
                }
            }
        });
    }
}
