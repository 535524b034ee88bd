/*
    error.rs - Error types for trust and federation

    Three families:
    - Validation: bad request shape, fails before any state change
    - Policy: relationship/protocol/bridge/hop preconditions, fails with
      no partial state (no partial path, no trace)
    - Transport: adapter failures, surfaced as failed responses at the
      router boundary rather than propagated as faults

    Callers can always retry after correcting the precondition.
*/

use thiserror::Error;

use super::types::{BridgeId, FederationProtocol};
use crate::core_context::model::types::BrokerId;

/// Errors from trust-ledger and router operations
#[derive(Debug, Error)]
pub enum FederationError {
    /// Request failed a shape/content check
    #[error("Validation error: {0}")]
    Validation(String),

    /// An active relationship with this partner already exists
    #[error("trust relationship with {0} already exists")]
    RelationshipExists(BrokerId),

    /// No relationship with this partner
    #[error("no trust relationship with {0}")]
    RelationshipNotFound(BrokerId),

    /// The relationship was already revoked
    #[error("trust relationship with {0} is already revoked")]
    AlreadyRevoked(BrokerId),

    /// Relationship exists but is not active (revoked, suspended, expired)
    #[error("trust relationship with {0} is not active")]
    RelationshipInactive(BrokerId),

    /// Requested protocol absent from the relationship's protocol set
    #[error("protocol {protocol} not supported for partner {partner}")]
    ProtocolNotSupported {
        partner: BrokerId,
        protocol: FederationProtocol,
    },

    /// Requested bridge is not attached to the relationship
    #[error("credential bridge {0} not found on relationship")]
    BridgeNotFound(BridgeId),

    /// Hop budget exhausted before the call could be routed
    #[error("hop limit exceeded: hop {current} with limit {limit}")]
    HopLimitExceeded { current: u32, limit: u32 },

    /// Adapter-level network or timeout failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Assertion signing failure
    #[error("Auth error: {0}")]
    Auth(String),

    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invariant breach that should not be reachable
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for federation operations
pub type FederationResult<T> = Result<T, FederationError>;

impl From<serde_json::Error> for FederationError {
    fn from(err: serde_json::Error) -> Self {
        FederationError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for FederationError {
    fn from(err: rusqlite::Error) -> Self {
        FederationError::Storage(err.to_string())
    }
}

impl From<r2d2::Error> for FederationError {
    fn from(err: r2d2::Error) -> Self {
        FederationError::Storage(err.to_string())
    }
}
