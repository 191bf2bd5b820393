//! Tracing/logging initialization.
//!
//! JSON output by default, compact text for local runs. `RUST_LOG` wins over
//! the configured level when set.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const LOG_LEVEL_VAR: &str = "PROPMARKET_LOG_LEVEL";
pub const LOG_FORMAT_VAR: &str = "PROPMARKET_LOG_FORMAT";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "compact" => Ok(LogFormat::Text),
            _ => Err("expected 'json' or 'text'".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Default filter directive when `RUST_LOG` is unset (e.g. `info`,
    /// `propmarket_infra=debug`).
    pub level: String,
    pub format: LogFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl TracingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (tests inject a map here).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(level) = lookup(LOG_LEVEL_VAR) {
            EnvFilter::try_new(&level).map_err(|e| ConfigError::Invalid {
                key: LOG_LEVEL_VAR,
                value: level.clone(),
                reason: e.to_string(),
            })?;
            config.level = level;
        }

        if let Some(format) = lookup(LOG_FORMAT_VAR) {
            config.format = format.parse().map_err(|reason| ConfigError::Invalid {
                key: LOG_FORMAT_VAR,
                value: format.clone(),
                reason,
            })?;
        }

        Ok(config)
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Install the global subscriber.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_with(config: &TracingConfig) {
    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(config.filter())
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(config.filter())
            .compact()
            .with_target(true)
            .try_init(),
    };

    if installed.is_ok() {
        ::tracing::debug!(level = %config.level, format = ?config.format, "tracing initialized");
    }
}
