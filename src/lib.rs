//! streamgate - WebRTC session gateway for Amazon GameLift Streams
//!
//! Browsers (or the bundled headless client) exchange WebRTC signals with
//! GameLift Streams through this gateway. Each started stream is named by an
//! opaque connection token that expires after a fixed timeout.

pub mod client;
pub mod config;
pub mod error;
pub mod provider;
pub mod session;
pub mod state;
pub mod web;

pub use error::{AppError, Result};
