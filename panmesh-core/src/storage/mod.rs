//! Durable storage for trust relationships and shared contexts
//!
//! SQLite-backed relational image of the in-memory aggregates, plus the
//! versioned migrations that create its schema. The append-only change
//! log lives in its own file format, not in these tables.

pub mod migrations;
pub mod sql_store;

use thiserror::Error;

pub use sql_store::SqlStore;

/// Errors from the relational storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A stored string failed to parse back into its enum
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for crate::core_context::store::errors::ContextError {
    fn from(err: StorageError) -> Self {
        crate::core_context::store::errors::ContextError::Storage(err.to_string())
    }
}

impl From<StorageError> for crate::core_federation::error::FederationError {
    fn from(err: StorageError) -> Self {
        crate::core_federation::error::FederationError::Storage(err.to_string())
    }
}
