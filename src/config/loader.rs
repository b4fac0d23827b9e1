use std::path::Path;
use std::str::FromStr;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Load configuration from an optional TOML file and the process environment
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Load configuration with environment variables resolved through `lookup`
pub fn load_config_with<F>(path: Option<&Path>, lookup: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                AppError::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let config: AppConfig = toml::from_str(&raw).map_err(|e| {
                AppError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?;
            tracing::info!("Loaded configuration from {}", path.display());
            config
        }
        None => AppConfig::default(),
    };

    apply_env_overrides(&mut config, lookup)?;
    Ok(config)
}

/// Apply environment overrides using `lookup` to resolve variables
///
/// Empty values are ignored so that `FOO=` in a compose file does not
/// clobber a file-provided setting.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("STREAM_GROUP_ID") {
        config.provider.stream_group_id = Some(v);
    }
    if let Some(v) = get("AWS_REGION") {
        config.provider.region = v;
    }
    if let Some(v) = get("GAMELIFTSTREAMS_ENDPOINT") {
        config.provider.endpoint = Some(v);
    }
    if let Some(v) = get("PROVIDER_MAX_ATTEMPTS") {
        config.provider.max_attempts = parse_var("PROVIDER_MAX_ATTEMPTS", &v)?;
    }
    if let Some(v) = get("DEPLOYMENT_MODE") {
        config.deployment = v.parse()?;
    }
    if let Some(v) = get("PORT") {
        config.web.port = parse_var("PORT", &v)?;
    }
    if let Some(v) = get("CONNECTION_TIMEOUT") {
        config.session.connection_timeout_secs = parse_var("CONNECTION_TIMEOUT", &v)?;
    }
    if let Some(v) = get("CLEANUP_INTERVAL") {
        config.session.cleanup_interval_ms = parse_var("CLEANUP_INTERVAL", &v)?;
    }
    if let Some(v) = get("SESSION_LENGTH") {
        config.session.session_length_secs = Some(parse_var("SESSION_LENGTH", &v)?);
    }
    if let Some(v) = get("RATE_LIMIT_WINDOW") {
        config.rate_limit.window_ms = parse_var("RATE_LIMIT_WINDOW", &v)?;
    }
    if let Some(v) = get("RATE_LIMIT_MAX") {
        config.rate_limit.max_requests = parse_var("RATE_LIMIT_MAX", &v)?;
    }

    Ok(())
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("Invalid value for {}: {}", key, value)))
}
