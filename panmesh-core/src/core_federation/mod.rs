/*
    core_federation - Trust and federation layer

    Manages trust relationships between broker instances and routes
    federation requests across them. Handles:
    - Trust relationship lifecycle (establish, revoke, expiry sweep)
    - Credential bridges between trust domains
    - Cross-domain assertion signing
    - Multi-hop federation with bounded hop budgets
*/

pub mod auth;
pub mod error;
pub mod registry;
pub mod router;
pub mod trust_ledger;
pub mod types;

#[cfg(test)]
pub mod tests;

// Re-export commonly used types
pub use auth::{
    AcceptAllCredentials, AssertionClaims, AssertionSigner, CredentialVerdict,
    CredentialVerifier, SignedAssertion,
};
pub use error::{FederationError, FederationResult};
pub use registry::{BrokerRecord, BrokerRegistry};
pub use router::{
    EstablishTrustRequest, FederateContextRequest, FederationGrant, FederationRouter,
    RevokeTrustRequest, RouterConfig, DEFAULT_MAX_HOPS, HARD_MAX_HOPS,
};
pub use trust_ledger::TrustLedger;
pub use types::{
    BridgeId, CredentialBridge, FederatedAffordance, FederationHop, FederationProtocol,
    RelationshipId, RelationshipStatus, TrustLevel, TrustRelationship,
};
