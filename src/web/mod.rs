mod handlers;
mod rate_limit;
mod routes;

pub use rate_limit::ClientRateLimiter;
pub use routes::{create_router, MAX_BODY_BYTES};
