/*
    logging - Structured logging via tracing

    Thin wrapper over tracing-subscriber: an env-filter honoring
    RUST_LOG, plus a fmt layer that can emit plain or JSON records.
    Call init_logging (or init_logging_with_config) once at startup.
*/

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

use crate::config::LoggingConfig;

/// Runtime logging options
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level when RUST_LOG is unset
    pub level: LogLevel,
    /// Include timestamps
    pub with_timestamp: bool,
    /// Include the target module path
    pub with_target: bool,
    /// Emit JSON records instead of the human format
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_timestamp: true,
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

    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.with_timestamp = enabled;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(section: &LoggingConfig) -> Self {
        Self {
            level: LogLevel::parse(&section.level).unwrap_or_default(),
            with_timestamp: section.with_timestamp,
            with_target: section.with_target,
            json_format: section.json_format,
        }
    }
}

/// Initialize logging with defaults
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize logging with explicit options
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let result = if config.json_format {
        let layer = fmt::layer().with_target(config.with_target).json();
        if config.with_timestamp {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer.without_time())
                .try_init()
        }
    } else {
        let layer = fmt::layer().with_target(config.with_target);
        if config.with_timestamp {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer.without_time())
                .try_init()
        }
    };

    result.map_err(|e| LoggingError::InitializationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert!(config.with_timestamp);
        assert!(config.with_target);
        assert!(!config.json_format);
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new(LogLevel::Debug)
            .with_timestamp(false)
            .with_target(false)
            .json_format(true);

        assert_eq!(config.level, LogLevel::Debug);
        assert!(!config.with_timestamp);
        assert!(!config.with_target);
        assert!(config.json_format);
    }

    #[test]
    fn test_from_config_section() {
        let section = LoggingConfig {
            level: "warn".to_string(),
            json_format: true,
            with_timestamp: false,
            with_target: true,
        };
        let config = LogConfig::from(&section);
        assert_eq!(config.level, LogLevel::Warn);
        assert!(config.json_format);
        assert!(!config.with_timestamp);
    }
}
