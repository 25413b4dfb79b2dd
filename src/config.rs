//! Configuration management for the CRPT API client.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Error, Result};

/// Registry endpoint for creating documents.
pub const DEFAULT_API_URL: &str = "https://ismp.crpt.ru/api/v3/lk/documents/create";

/// Prefix for environment variable overrides, e.g. `CRPT__RATE_LIMIT__LIMIT=5`.
const ENV_PREFIX: &str = "CRPT";

/// Main configuration for the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Endpoint documents are POSTed to
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Admission limits; always supplied by the caller
    pub rate_limit: RateLimitConfig,

    /// Bounded wait used for both driver stop and in-flight drain on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// User agent sent by the HTTP transport
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_shutdown_grace() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("crpt-api/{}", env!("CARGO_PKG_VERSION"))
}

impl ClientConfig {
    /// Build a configuration around the given rate limit, defaulting the rest.
    pub fn new(rate_limit: RateLimitConfig) -> Self {
        Self {
            api_url: default_api_url(),
            rate_limit,
            shutdown_grace_secs: default_shutdown_grace(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }

    /// Load configuration from a file, layered with `CRPT__` environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading client configuration");

        if !path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", path.display()),
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let config: ClientConfig = settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ClientConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Failed to parse client config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field is usable.
    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(Error::Config("api_url must not be empty".to_string()));
        }
        self.rate_limit.validate()
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Rate limit window and permit count.
///
/// At most `limit` calls are admitted per window; each window restores the
/// full quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Permits available per window
    pub limit: u32,
}

impl RateLimitConfig {
    /// Create a rate limit configuration. Windows are held in whole
    /// milliseconds, so a window with a sub-millisecond remainder is
    /// rejected. Zero values are rejected by [`validate`](Self::validate).
    pub fn new(window: Duration, limit: u32) -> Result<Self> {
        if window.subsec_nanos() % 1_000_000 != 0 {
            return Err(Error::Config(format!(
                "rate_limit window must be a whole number of milliseconds, got {:?}",
                window
            )));
        }
        let window_ms = u64::try_from(window.as_millis())
            .map_err(|_| Error::Config(format!("rate_limit window too large: {:?}", window)))?;

        Ok(Self { window_ms, limit })
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(Error::Config("rate_limit.limit must be at least 1".to_string()));
        }
        if self.window_ms == 0 {
            return Err(Error::Config(
                "rate_limit.window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
