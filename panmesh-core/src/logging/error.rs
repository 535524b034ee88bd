/*
    error.rs - Logging subsystem errors
*/

use std::fmt;

/// Errors raised while wiring up the logging subsystem
#[derive(Debug, Clone)]
pub enum LoggingError {
    /// A global subscriber is already installed, or installation failed
    InitializationFailed(String),
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggingError::InitializationFailed(msg) => {
                write!(f, "failed to initialize logging: {}", msg)
            }
        }
    }
}

impl std::error::Error for LoggingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LoggingError::InitializationFailed("already set".to_string());
        assert_eq!(err.to_string(), "failed to initialize logging: already set");
    }
}
