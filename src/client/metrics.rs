use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Cumulative inbound counters read from a peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PeerStats {
    pub bytes_received: u64,
    pub packets_received: u64,
    pub rtt_ms: Option<f64>,
}

/// Rates over one sampling interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub bitrate_kbps: f64,
    pub packets_per_sec: f64,
    pub rtt_ms: Option<f64>,
}

/// Anything that can report [`PeerStats`]
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn sample(&self) -> PeerStats;
}

/// Turns successive cumulative samples into rates
#[derive(Debug, Default)]
pub struct StatsSampler {
    last: Option<(PeerStats, Instant)>,
}

impl StatsSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a sample taken at `at`
    ///
    /// Returns `None` for the first sample, for a zero-length interval, and
    /// when a counter went backwards (the peer was replaced). Those samples
    /// become the new baseline.
    pub fn update(&mut self, stats: PeerStats, at: Instant) -> Option<MetricsSnapshot> {
        let previous = self.last.replace((stats, at));
        let (prev, prev_at) = previous?;

        if stats.bytes_received < prev.bytes_received
            || stats.packets_received < prev.packets_received
        {
            debug!("Peer counters reset, re-baselining");
            return None;
        }

        let elapsed = at.saturating_duration_since(prev_at).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }

        let bytes = (stats.bytes_received - prev.bytes_received) as f64;
        let packets = (stats.packets_received - prev.packets_received) as f64;

        Some(MetricsSnapshot {
            bitrate_kbps: bytes * 8.0 / 1000.0 / elapsed,
            packets_per_sec: packets / elapsed,
            rtt_ms: stats.rtt_ms,
        })
    }
}

/// Sample `source` every `interval` for `duration`, logging each snapshot
///
/// Returns the last snapshot produced, if any.
pub async fn monitor<S: StatsSource + ?Sized>(
    source: &S,
    interval: Duration,
    duration: Duration,
) -> Option<MetricsSnapshot> {
    let start = Instant::now();
    let deadline = start + duration;
    let mut sampler = StatsSampler::new();
    let mut latest = None;

    sampler.update(source.sample().await, start);

    let mut ticker = interval_at(start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let now = ticker.tick().await;
        if now > deadline {
            break;
        }

        if let Some(snapshot) = sampler.update(source.sample().await, now) {
            info!(
                bitrate_kbps = snapshot.bitrate_kbps.round(),
                packets_per_sec = snapshot.packets_per_sec.round(),
                rtt_ms = snapshot.rtt_ms,
                "Stream metrics"
            );
            latest = Some(snapshot);
        }
    }

    latest
}
