//! Connection tokens and the stream sessions they name

mod registry;
mod service;
mod sweeper;
mod token;

pub use registry::{MemorySessionStore, SessionRecord, SessionStore};
pub use service::{CreateSession, SessionService, SessionSettings};
pub use sweeper::spawn_expiry_sweeper;
pub use token::{generate_token, TOKEN_BYTES};
