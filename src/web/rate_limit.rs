use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::error::AppError;
use crate::state::AppState;

/// Per-client request limiter (GCRA via `governor`)
///
/// `max_requests` may burst at once; capacity then refills evenly over the
/// window.
pub struct ClientRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl ClientRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let max_requests = NonZeroU32::new(config.max_requests).unwrap_or(nonzero!(1u32));
        let period = Duration::from_millis(config.window_ms)
            .checked_div(max_requests.get())
            .filter(|p| !p.is_zero())
            .unwrap_or(Duration::from_millis(1));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(max_requests))
            .allow_burst(max_requests);

        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Returns the retry-after in seconds when `key` is over quota
    pub fn check(&self, key: &str) -> Result<(), u64> {
        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Err(wait.as_secs().max(1))
            }
        }
    }

    /// Forget clients whose buckets have fully refilled
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}

/// Rate limit middleware for `/api`, keyed by peer IP
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request);

    if let Err(retry_after_secs) = state.rate_limiter.check(&key) {
        debug!(client = %key, retry_after_secs, "Rate limit exceeded");
        return AppError::RateLimited { retry_after_secs }.into_response();
    }

    next.run(request).await
}

fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
