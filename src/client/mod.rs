//! Headless streaming client
//!
//! Drives the same signaling exchange a browser client performs against the
//! gateway:
//!
//! ```text
//! LocalPeer ── offer ──> SignalingApi::create_stream_session ──> token
//!                        SignalingApi::get_signal_response (poll) ──> answer
//! LocalPeer <─ answer ──
//! ```
//!
//! [`SignalingLoop`] owns the sequencing. [`HttpSignalingApi`] and
//! [`WebRtcPeer`] are the production seams; tests substitute stubs. Once
//! connected, an [`InputReplay`] can drive keyboard and gamepad input
//! through the peer's `input` data channel.

mod api;
mod input;
mod metrics;
mod peer;
mod signaling;

use thiserror::Error;

pub use api::HttpSignalingApi;
pub use input::{parse_script, InputEvent, InputReplay, InputSink, KeyAction, TimedInput};
pub use metrics::{monitor, MetricsSnapshot, PeerStats, StatsSampler, StatsSource};
pub use peer::WebRtcPeer;
pub use signaling::{LocalPeer, SignalingApi, SignalingLoop, StreamRequest};

/// Client-side failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The gateway no longer knows the token
    #[error("Stream session not found")]
    NotFound,

    #[error("Gateway returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Peer connection error: {0}")]
    Peer(String),

    #[error("Invalid input script: {0}")]
    Input(String),

    /// A newer attempt replaced this one
    #[error("Connection attempt superseded")]
    Superseded,
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
