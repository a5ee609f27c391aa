//! Process-wide logging setup.
//!
//! The library logs through the `log` facade and opens `tracing` spans around
//! jobs. [`init_logging`] routes both into one `tracing-subscriber` pipeline.

use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Builds the event filter. `RUST_LOG` wins over the configured level when it
/// is set and parses.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| ConfigError::Validation {
        message: format!("Invalid log level '{}': {}", config.level, e),
    })
}

/// Installs the global subscriber. Fails if logging was already initialized.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = build_filter(config)?;

    LogTracer::init().map_err(|e| ConfigError::Logging(e.to_string()))?;

    let json = config.json.then(|| fmt::layer().json().with_target(true));
    let text = (!config.json).then(|| fmt::layer().with_target(true));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    log::debug!("Logging initialized (level: {}, json: {})", config.level, config.json);
    Ok(())
}
