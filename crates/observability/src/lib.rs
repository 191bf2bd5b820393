//! Tracing/logging setup shared by every process that embeds the marketplace.

/// Initialize process-wide tracing from the environment.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() -> Result<(), ConfigError> {
    let config = TracingConfig::from_env()?;
    tracing::init_with(&config);
    Ok(())
}

/// Subscriber configuration and installation.
pub mod tracing;

pub use self::tracing::{ConfigError, LogFormat, TracingConfig, init_with};
