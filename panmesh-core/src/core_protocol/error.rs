/*
    error.rs - Protocol adapter errors

    Two families: WireError for transport-class failures (connect,
    timeout) that the HTTP adapter may retry, and ProtocolError for
    envelope problems that no retry can fix. Application-level non-2xx
    replies are neither; they travel inside AdapterResponse.
*/

use std::time::Duration;
use thiserror::Error;

/// Transport-class failure underneath an adapter
#[derive(Error, Debug)]
pub enum WireError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport failure: {0}")]
    Io(String),
}

impl From<reqwest::Error> for WireError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WireError::Timeout(Duration::ZERO)
        } else if err.is_connect() {
            WireError::Connect(err.to_string())
        } else {
            WireError::Io(err.to_string())
        }
    }
}

/// Envelope-level failure while building or parsing a wire message
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}

/// Result type for protocol parsing
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_format_with_detail() {
        let err = ProtocolError::InvalidEnvelope("missing 'type'".to_string());
        assert!(err.to_string().contains("missing 'type'"));

        let err = WireError::Connect("refused".to_string());
        assert!(err.to_string().contains("refused"));
    }
}
