use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::SessionStore;

/// Spawn the periodic expiry sweep
///
/// Every `period`, records older than `timeout` are removed. The task exits
/// when `cancel` fires.
pub fn spawn_expiry_sweeper(
    store: Arc<dyn SessionStore>,
    timeout: Duration,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Session expiry sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = store.remove_expired(timeout);
                    if removed > 0 {
                        info!(removed, remaining = store.len(), "Expired stream session tokens removed");
                    }
                }
            }
        }
    })
}
