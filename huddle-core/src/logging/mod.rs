//! Logging setup over `tracing-subscriber`
//!
//! `RUST_LOG`, when set, wins over the configured level so operators can turn
//! on per-module filters without touching the config file.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub with_target: bool,
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_target: true,
            json_format: false,
        }
    }
}

impl LogConfig {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }

    /// Build from the `[logging]` config section
    pub fn from_config(config: &LoggingConfig) -> Result<Self, LoggingError> {
        Ok(Self::new(config.level.parse()?)
            .with_target(config.with_target)
            .json_format(config.json_format))
    }
}

/// Install the global subscriber with default settings
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.level.as_str())
            .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?,
    };

    let fmt_layer = fmt::layer().with_target(config.with_target);
    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_format {
        registry.with(fmt_layer.json()).try_init()
    } else {
        registry.with(fmt_layer).try_init()
    };
    result.map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let section = LoggingConfig {
            level: "debug".to_string(),
            json_format: true,
            with_target: false,
        };
        let config = LogConfig::from_config(&section).unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.json_format);
        assert!(!config.with_target);
    }

    #[test]
    fn test_from_config_rejects_unknown_level() {
        let section = LoggingConfig {
            level: "chatty".to_string(),
            ..Default::default()
        };
        assert_eq!(
            LogConfig::from_config(&section).unwrap_err(),
            LoggingError::UnknownLevel("chatty".to_string())
        );
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging_with_config(LogConfig::new(LogLevel::Warn));
        assert!(matches!(
            init_logging(),
            Err(LoggingError::InitializationFailed(_))
        ));
    }
}
