use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::session::SessionService;
use crate::web::ClientRateLimiter;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Effective configuration (read-only after startup)
    pub config: Arc<AppConfig>,
    /// Stream session lifecycle
    pub sessions: Arc<SessionService>,
    /// Per-client `/api` limiter
    pub rate_limiter: Arc<ClientRateLimiter>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: Arc<AppConfig>,
        sessions: Arc<SessionService>,
        rate_limiter: Arc<ClientRateLimiter>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions,
            rate_limiter,
            shutdown_tx,
        })
    }

    /// Subscribe to the shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}
