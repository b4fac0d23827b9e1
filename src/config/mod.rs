//! Configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables. Command line flags are applied last by `main`.

mod loader;
mod schema;

pub use loader::{apply_env_overrides, load_config, load_config_with};
pub use schema::*;
