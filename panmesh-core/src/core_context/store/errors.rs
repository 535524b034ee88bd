/*
    errors.rs - Error types for the shared-context subsystem

    Covers:
    - Validation failures (missing/duplicate ids, bad edges)
    - Access failures
    - Storage and serialization failures
    - Change-log corruption
*/

use thiserror::Error;

/// Errors that can occur in the shared-context subsystem
#[derive(Debug, Error)]
pub enum ContextError {
    /// Context or entity lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Identifier already in use
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Precondition on the request failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller lacks the required access level
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Change-log framing or checksum failure
    #[error("Corrupted change log: {0}")]
    CorruptedLog(String),

    /// Invariant breach that should not be reachable
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for shared-context operations
pub type ContextResult<T> = Result<T, ContextError>;

impl From<std::io::Error> for ContextError {
    fn from(err: std::io::Error) -> Self {
        ContextError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ContextError {
    fn from(err: serde_json::Error) -> Self {
        ContextError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for ContextError {
    fn from(err: rusqlite::Error) -> Self {
        ContextError::Storage(err.to_string())
    }
}

impl From<r2d2::Error> for ContextError {
    fn from(err: r2d2::Error) -> Self {
        ContextError::Storage(err.to_string())
    }
}
