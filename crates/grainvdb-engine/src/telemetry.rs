//! Tracing subscriber setup.
//!
//! The engine only emits `tracing` events; installing a subscriber is left to
//! the embedding application. [`init_tracing`] is a convenience that builds a
//! stderr `fmt` subscriber from [`LoggingConfig`].

use std::io;

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{EngineError, EngineResult};

/// Build the event filter: `RUST_LOG` wins over the configured level.
pub fn env_filter(config: &LoggingConfig) -> EngineResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| {
        EngineError::Config(format!("logging.level '{}' is invalid: {}", config.level, e))
    })
}

/// Install a global stderr subscriber.
///
/// Returns `Ok(false)` if a global subscriber was already installed, so
/// calling this more than once is harmless.
///
/// # Errors
///
/// `Config` if the level directive or format is invalid.
pub fn init_tracing(config: &LoggingConfig) -> EngineResult<bool> {
    let filter = env_filter(config)?;
    let builder = fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let installed = match config.format.as_str() {
        "pretty" => builder.pretty().try_init().is_ok(),
        "compact" => builder.compact().try_init().is_ok(),
        "full" => builder.try_init().is_ok(),
        other => {
            return Err(EngineError::Config(format!(
                "logging.format must be one of pretty, compact, full; got '{}'",
                other
            )))
        }
    };
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_format() {
        let config = LoggingConfig {
            format: "xml".to_string(),
            ..LoggingConfig::default()
        };
        assert!(matches!(init_tracing(&config), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_second_init_is_harmless() {
        let config = LoggingConfig::default();
        let _first = init_tracing(&config).expect("first init");
        let second = init_tracing(&config).expect("second init");
        assert!(!second);
    }
}
