use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// How clients reach the stream group
    pub deployment: DeploymentMode,
    /// Web server settings
    pub web: WebConfig,
    /// Streaming provider settings
    pub provider: ProviderConfig,
    /// Session registry timing
    pub session: SessionConfig,
    /// Per-client request limits
    pub rate_limit: RateLimitConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            deployment: DeploymentMode::default(),
            web: WebConfig::default(),
            provider: ProviderConfig::default(),
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.session.connection_timeout_secs == 0 {
            return Err(AppError::Config(
                "session.connection_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.session.cleanup_interval_ms == 0 {
            return Err(AppError::Config(
                "session.cleanup_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.rate_limit.window_ms == 0 || self.rate_limit.max_requests == 0 {
            return Err(AppError::Config(
                "rate_limit.window_ms and rate_limit.max_requests must be greater than zero"
                    .to_string(),
            ));
        }
        if self.deployment == DeploymentMode::Hosted && self.provider.stream_group_id.is_none() {
            return Err(AppError::Config(
                "hosted deployment requires provider.stream_group_id (STREAM_GROUP_ID)"
                    .to_string(),
            ));
        }
        if self.provider.region.trim().is_empty() {
            return Err(AppError::Config("provider.region must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Deployment mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Clients name the stream group; configuration supplies a fallback
    #[default]
    Local,
    /// The stream group is fixed by the deployment
    Hosted,
}

impl std::str::FromStr for DeploymentMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "hosted" => Ok(Self::Hosted),
            other => Err(AppError::Config(format!("Unknown deployment mode: {}", other))),
        }
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub bind_address: String,
    /// HTTP/HTTPS port
    pub port: u16,
    /// Serve TLS instead of plain HTTP
    pub https_enabled: bool,
    /// Custom SSL certificate path
    pub ssl_cert_path: Option<String>,
    /// Custom SSL key path
    pub ssl_key_path: Option<String>,
    /// Directory holding the web client (served at `/`)
    pub static_dir: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            https_enabled: false,
            ssl_cert_path: None,
            ssl_key_path: None,
            static_dir: None,
        }
    }
}

/// Streaming provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// AWS region hosting the stream groups
    pub region: String,
    /// Endpoint override (defaults to the regional GameLift Streams endpoint)
    pub endpoint: Option<String>,
    /// Stream group used when requests do not name one (required when hosted)
    pub stream_group_id: Option<String>,
    /// Per-attempt provider request timeout in seconds
    pub request_timeout_secs: u64,
    /// Attempts per provider call, including the first (SDK standard retry)
    pub max_attempts: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: "us-west-2".to_string(),
            endpoint: None,
            stream_group_id: None,
            request_timeout_secs: 30,
            max_attempts: 3,
        }
    }
}

impl ProviderConfig {
    /// Explicit endpoint, if one is configured
    pub fn endpoint_override(&self) -> Option<String> {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| e.trim_end_matches('/').to_string())
    }
}

/// Session registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Token lifetime; also sent to the provider as the connection timeout
    pub connection_timeout_secs: u64,
    /// Expiry sweep period in milliseconds
    pub cleanup_interval_ms: u64,
    /// Maximum stream length forwarded to the provider
    pub session_length_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 120,
            cleanup_interval_ms: 60_000,
            session_length_secs: None,
        }
    }
}

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests allowed per client within one window
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_hosted_requires_stream_group() {
        let mut config = AppConfig {
            deployment: DeploymentMode::Hosted,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        config.provider.stream_group_id = Some("sg-1".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_timings_rejected() {
        let mut config = AppConfig::default();
        config.session.connection_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.cleanup_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate_limit.max_requests = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_override() {
        let mut provider = ProviderConfig::default();
        assert_eq!(provider.endpoint_override(), None);

        provider.endpoint = Some("  ".to_string());
        assert_eq!(provider.endpoint_override(), None);

        provider.endpoint = Some("http://localhost:4566/".to_string());
        assert_eq!(
            provider.endpoint_override().as_deref(),
            Some("http://localhost:4566")
        );
    }

    #[test]
    fn test_deployment_mode_parse() {
        assert_eq!("Hosted".parse::<DeploymentMode>().unwrap(), DeploymentMode::Hosted);
        assert_eq!("local".parse::<DeploymentMode>().unwrap(), DeploymentMode::Local);
        assert!("lambda".parse::<DeploymentMode>().is_err());
    }
}
