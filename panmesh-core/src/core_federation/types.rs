/*
    types.rs - Trust and federation data model

    Defines:
    - TrustRelationship and its lifecycle status
    - CredentialBridge (cross-domain credential honoring)
    - FederationHop (per-call audit trail, not a routing table)
    - FederationProtocol (closed set of wire encodings)
    - FederatedAffordance (what a successful federation grants)
*/

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_context::model::types::{AccessLevel, BrokerId, Timestamp};

/// Unique identifier for a trust relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipId(pub String);

impl RelationshipId {
    pub fn new(id: String) -> Self {
        RelationshipId(id)
    }

    pub fn generate() -> Self {
        use uuid::Uuid;
        RelationshipId(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a credential bridge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeId(pub String);

impl BridgeId {
    pub fn new(id: String) -> Self {
        BridgeId(id)
    }

    pub fn generate() -> Self {
        use uuid::Uuid;
        BridgeId(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How far a partner is trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustLevel {
    /// No cross-domain auth required
    FullTrust,
    /// Short-lived signed assertion attached to every exchange
    LimitedTrust,
    /// Every exchange re-verified end to end
    VerifyAlways,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::FullTrust => "FullTrust",
            TrustLevel::LimitedTrust => "LimitedTrust",
            TrustLevel::VerifyAlways => "VerifyAlways",
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TrustLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FullTrust" => Ok(TrustLevel::FullTrust),
            "LimitedTrust" => Ok(TrustLevel::LimitedTrust),
            "VerifyAlways" => Ok(TrustLevel::VerifyAlways),
            other => Err(format!("unknown trust level: {}", other)),
        }
    }
}

/// Lifecycle status of a trust relationship.
/// Active -> Revoked is the only transition the ledger drives; Revoked is
/// terminal. Suspended is representable for imported state but no core
/// operation produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipStatus {
    Active,
    Suspended,
    Revoked,
}

impl RelationshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipStatus::Active => "Active",
            RelationshipStatus::Suspended => "Suspended",
            RelationshipStatus::Revoked => "Revoked",
        }
    }
}

impl fmt::Display for RelationshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Wire encodings a relationship may federate over. Closed set: adding
/// one means adding an adapter, checked at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FederationProtocol {
    Http,
    DidComm,
    ActivityPub,
    Ldn,
}

impl FederationProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            FederationProtocol::Http => "HTTP",
            FederationProtocol::DidComm => "DIDComm",
            FederationProtocol::ActivityPub => "ActivityPub",
            FederationProtocol::Ldn => "LDN",
        }
    }

    pub fn all() -> [FederationProtocol; 4] {
        [
            FederationProtocol::Http,
            FederationProtocol::DidComm,
            FederationProtocol::ActivityPub,
            FederationProtocol::Ldn,
        ]
    }
}

impl fmt::Display for FederationProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FederationProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP" | "http" => Ok(FederationProtocol::Http),
            "DIDComm" | "didcomm" => Ok(FederationProtocol::DidComm),
            "ActivityPub" | "activitypub" => Ok(FederationProtocol::ActivityPub),
            "LDN" | "ldn" => Ok(FederationProtocol::Ldn),
            other => Err(format!("unknown federation protocol: {}", other)),
        }
    }
}

/// Declares that a capability credential issued in `from_domain` is
/// honored in `to_domain`. Owned by exactly one relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialBridge {
    pub id: BridgeId,
    pub from_domain: String,
    pub to_domain: String,
    pub created_at: Timestamp,
    /// Set when the owning relationship is revoked with bridge cleanup;
    /// revoked bridges are retained for audit
    pub revoked: bool,
}

impl CredentialBridge {
    pub fn new(from_domain: String, to_domain: String) -> Self {
        CredentialBridge {
            id: BridgeId::generate(),
            from_domain,
            to_domain,
            created_at: Timestamp::now(),
            revoked: false,
        }
    }
}

/// One relay step recorded after a successful federateContext call.
/// An ordered audit trail on the relationship, not a routing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationHop {
    /// Broker the hop reached
    pub broker: BrokerId,

    /// 1-based position in the path
    pub hop_number: u32,

    pub protocol: FederationProtocol,

    pub occurred_at: Timestamp,
}

/// Authorization contract between this broker and one partner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustRelationship {
    pub id: RelationshipId,

    /// The partner broker this relationship is keyed by
    pub partner: BrokerId,

    pub level: TrustLevel,

    /// Optional trust-domain identifier
    pub trust_domain: Option<String>,

    /// Protocols federation with this partner may use
    pub protocols: Vec<FederationProtocol>,

    /// Ordered credential bridges, at least one
    pub bridges: Vec<CredentialBridge>,

    /// Audit trail of successful federation calls
    pub hops: Vec<FederationHop>,

    pub status: RelationshipStatus,

    pub established_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub revoked_at: Option<Timestamp>,
    pub revocation_reason: Option<String>,
}

impl TrustRelationship {
    /// Active and not past its expiry
    pub fn is_active(&self, now: Timestamp) -> bool {
        if self.status != RelationshipStatus::Active {
            return false;
        }
        match self.expires_at {
            Some(expiry) => now < expiry,
            None => true,
        }
    }

    pub fn supports_protocol(&self, protocol: FederationProtocol) -> bool {
        self.protocols.contains(&protocol)
    }

    pub fn has_bridge(&self, bridge_id: &BridgeId) -> bool {
        self.bridges.iter().any(|b| &b.id == bridge_id && !b.revoked)
    }
}

/// One federated capability synthesized for a resource URN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedAffordance {
    /// Resource the affordance covers
    pub resource_urn: String,

    /// What the receiving broker may do; federation grants Observe
    pub action: AccessLevel,

    /// Broker providing the resource
    pub provider: BrokerId,

    /// Relationship the affordance was granted through
    pub relationship_id: RelationshipId,

    /// False only under FullTrust
    pub requires_crossdomain_auth: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_round_trip() {
        for p in FederationProtocol::all() {
            let parsed: FederationProtocol = p.as_str().parse().unwrap();
            assert_eq!(parsed, p);
        }
        assert!("carrier-pigeon".parse::<FederationProtocol>().is_err());
    }

    #[test]
    fn test_trust_level_round_trip() {
        for level in [
            TrustLevel::FullTrust,
            TrustLevel::LimitedTrust,
            TrustLevel::VerifyAlways,
        ] {
            let parsed: TrustLevel = level.as_str().parse().unwrap();
            assert_eq!(parsed, level);
        }
        assert!("SomeTrust".parse::<TrustLevel>().is_err());
    }

    #[test]
    fn test_relationship_active_checks() {
        let rel = TrustRelationship {
            id: RelationshipId::generate(),
            partner: BrokerId::from("did:web:b.example"),
            level: TrustLevel::LimitedTrust,
            trust_domain: None,
            protocols: vec![FederationProtocol::Http],
            bridges: vec![CredentialBridge::new("a".to_string(), "b".to_string())],
            hops: Vec::new(),
            status: RelationshipStatus::Active,
            established_at: Timestamp::from_millis(1_000),
            expires_at: Some(Timestamp::from_millis(10_000)),
            revoked_at: None,
            revocation_reason: None,
        };

        assert!(rel.is_active(Timestamp::from_millis(5_000)));
        assert!(!rel.is_active(Timestamp::from_millis(10_000)));

        let mut revoked = rel.clone();
        revoked.status = RelationshipStatus::Revoked;
        assert!(!revoked.is_active(Timestamp::from_millis(5_000)));
    }

    #[test]
    fn test_protocol_support() {
        let rel = TrustRelationship {
            id: RelationshipId::generate(),
            partner: BrokerId::from("did:web:b.example"),
            level: TrustLevel::FullTrust,
            trust_domain: None,
            protocols: vec![FederationProtocol::Http, FederationProtocol::DidComm],
            bridges: Vec::new(),
            hops: Vec::new(),
            status: RelationshipStatus::Active,
            established_at: Timestamp::now(),
            expires_at: None,
            revoked_at: None,
            revocation_reason: None,
        };

        assert!(rel.supports_protocol(FederationProtocol::Http));
        assert!(!rel.supports_protocol(FederationProtocol::Ldn));
    }

    #[test]
    fn test_revoked_bridge_not_usable() {
        let mut bridge = CredentialBridge::new("dom-a".to_string(), "dom-b".to_string());
        let id = bridge.id.clone();
        bridge.revoked = true;

        let rel = TrustRelationship {
            id: RelationshipId::generate(),
            partner: BrokerId::from("did:web:b.example"),
            level: TrustLevel::LimitedTrust,
            trust_domain: None,
            protocols: vec![FederationProtocol::Http],
            bridges: vec![bridge],
            hops: Vec::new(),
            status: RelationshipStatus::Active,
            established_at: Timestamp::now(),
            expires_at: None,
            revoked_at: None,
            revocation_reason: None,
        };

        assert!(!rel.has_bridge(&id));
    }
}
