/*
    errors.rs - Broker facade errors

    Wraps the subsystem error families so callers of MeshBroker deal
    with one error type. Inbound-message failures get their own
    variants because they surface as wire replies, not process faults.
*/

use thiserror::Error;

use crate::config::ConfigError;
use crate::core_context::model::types::{BrokerId, ContextId};
use crate::core_context::store::errors::ContextError;
use crate::core_federation::error::FederationError;
use crate::core_protocol::ProtocolError;
use crate::storage::StorageError;

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors from high-level broker operations
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Trust or routing failure
    #[error("Federation error: {0}")]
    Federation(#[from] FederationError),

    /// Shared-context failure
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    /// Configuration failure
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Inbound envelope could not be parsed
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Inbound auth failed (missing, expired, or invalid assertion)
    #[error("Auth error: {0}")]
    Auth(String),

    /// Context visibility or access grants forbid the share
    #[error("context {context} is not shareable with {partner}")]
    NotShareable {
        context: ContextId,
        partner: BrokerId,
    },

    /// Inbound message named an operation this broker does not handle
    #[error("unsupported inbound operation: {0}")]
    UnsupportedOperation(String),

    /// Encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure while preparing the data directory
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        BrokerError::Io(err.to_string())
    }
}
