//! Sync configuration.
//!
//! Defaults match the hosted deployment: backend on, three retries at
//! 2s/4s/6s. A JSON file or environment variables can override any part.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_BACKEND_ENABLED: &str = "FOLIO_BACKEND_ENABLED";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "FOLIO_RETRY_BASE_DELAY_MS";
pub const ENV_MAX_RETRIES: &str = "FOLIO_MAX_RETRIES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue { var: &'static str, value: String },
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Linear backoff: attempt `n` waits `base_delay * n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay().saturating_mul(attempt)
    }
}

/// Top-level configuration for a sync instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// When false the backend is never contacted and every view serves its
    /// fallback dataset (local mode).
    pub backend_enabled: bool,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend_enabled: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Local mode: fallback data only.
    pub fn local() -> Self {
        Self {
            backend_enabled: false,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Defaults overridden by `FOLIO_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_BACKEND_ENABLED) {
            self.backend_enabled = parse_bool(&value).ok_or(ConfigError::InvalidValue {
                var: ENV_BACKEND_ENABLED,
                value,
            })?;
        }
        if let Some(value) = lookup(ENV_RETRY_BASE_DELAY_MS) {
            self.retry.base_delay_ms = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: ENV_RETRY_BASE_DELAY_MS,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ENV_MAX_RETRIES) {
            self.retry.max_retries = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: ENV_MAX_RETRIES,
                value: value.clone(),
            })?;
        }
        Ok(self)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
