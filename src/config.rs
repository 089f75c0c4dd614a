//! Application configuration.
//!
//! Environment variables are the single configuration source; every knob
//! except the API key has a sensible default.

use std::time::Duration;

use crate::client::RetryConfig;

pub const DEFAULT_BASE_URL: &str = "https://api.manus.ai/v1";
pub const DEFAULT_AGENT_PROFILE: &str = "manus-1.5";
/// Ceiling for inline attachment data.
pub const DEFAULT_MAX_INLINE_BYTES: usize = 1024 * 1024;
/// Service-side retention of uploaded file ids.
pub const DEFAULT_FILE_RETENTION: Duration = Duration::from_secs(48 * 60 * 60);

/// Error from configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("MANUS_API_KEY is required")]
    MissingApiKey,
}

/// Runtime configuration for the bridge.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the agent service.
    pub api_key: String,
    /// Base URL of the agent service API.
    pub base_url: String,
    /// Default agent profile for created tasks.
    pub agent_profile: String,
    /// Delay between status polls while waiting for completion.
    pub poll_interval: Duration,
    /// Default deadline for a polling wait.
    pub max_wait: Duration,
    /// Retry behavior for remote calls.
    pub retry: RetryConfig,
    /// Ceiling for inline attachment data, in bytes.
    pub max_inline_attachment_bytes: usize,
    /// Safety margin subtracted from presigned-URL expiry to absorb clock skew.
    pub upload_skew_margin: Duration,
    /// How long an uploaded file id stays valid on the service side.
    pub file_retention: Duration,
    /// Bind host for the webhook receiver.
    pub webhook_host: String,
    /// Bind port for the webhook receiver.
    pub webhook_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            agent_profile: DEFAULT_AGENT_PROFILE.to_string(),
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(300),
            retry: RetryConfig::default(),
            max_inline_attachment_bytes: DEFAULT_MAX_INLINE_BYTES,
            upload_skew_margin: Duration::from_secs(5),
            file_retention: DEFAULT_FILE_RETENTION,
            webhook_host: "127.0.0.1".to_string(),
            webhook_port: 8787,
        }
    }
}

impl Config {
    /// Build a configuration from environment variables.
    ///
    /// Recognized variables:
    /// - `MANUS_API_KEY` - API key (required for remote calls)
    /// - `MANUS_BASE_URL` - API base URL
    /// - `AGENT_PROFILE` - default agent profile for new tasks
    /// - `POLL_INTERVAL_SECS` / `MAX_WAIT_SECS` - polling cadence and deadline
    /// - `WEBHOOK_HOST` / `WEBHOOK_PORT` - receiver bind address
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("MANUS_API_KEY").unwrap_or_default(),
            base_url: std::env::var("MANUS_BASE_URL")
                .unwrap_or_else(|_| defaults.base_url.clone()),
            agent_profile: std::env::var("AGENT_PROFILE")
                .unwrap_or_else(|_| defaults.agent_profile.clone()),
            poll_interval: env_secs("POLL_INTERVAL_SECS", defaults.poll_interval),
            max_wait: env_secs("MAX_WAIT_SECS", defaults.max_wait),
            webhook_host: std::env::var("WEBHOOK_HOST")
                .unwrap_or_else(|_| defaults.webhook_host.clone()),
            webhook_port: std::env::var("WEBHOOK_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.webhook_port),
            ..defaults
        }
    }

    /// Check that required settings are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(())
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(value) => match value.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                tracing::warn!("Ignoring invalid {}: {:?}", name, value);
                default
            }
        },
        Err(_) => default,
    }
}
