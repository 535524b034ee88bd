/*
    types.rs - Common types for core_context models

    Defines:
    - Timestamps
    - IDs for brokers, contexts, graph entities
    - Visibility, sync strategy, and conflict mode enums
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp representing the current time
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_millis() as u64)
    }

    /// Create a timestamp from milliseconds since epoch
    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    /// Get milliseconds since epoch
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get whole seconds since epoch
    pub fn as_secs(&self) -> u64 {
        self.0 / 1000
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broker identifier (a DID string, e.g. "did:web:broker-a.example")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BrokerId(pub String);

impl BrokerId {
    pub fn new(did: String) -> Self {
        BrokerId(did)
    }

    /// Whether the identifier is syntactically a DID
    pub fn is_did(&self) -> bool {
        self.0.starts_with("did:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BrokerId {
    fn from(did: &str) -> Self {
        BrokerId(did.to_string())
    }
}

/// Unique identifier for a shared context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub String);

impl ContextId {
    pub fn new(id: String) -> Self {
        ContextId(id)
    }

    pub fn generate() -> Self {
        use uuid::Uuid;
        let id = Uuid::new_v4().to_string();
        ContextId(id)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a context node or edge (unique within its context)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: String) -> Self {
        EntityId(id)
    }

    pub fn generate() -> Self {
        use uuid::Uuid;
        let id = Uuid::new_v4().to_string();
        EntityId(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who may see a shared context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// Only the owning broker
    Private,
    /// Owner plus the participant list
    Participants,
    /// Any broker with an active trust relationship
    Public,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Participants
    }
}

/// Replication strategy for a shared context
///
/// State-based CRDT merge is the only strategy the store implements; the
/// enum keeps it a closed, compile-time-checked extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStrategy {
    /// Full-state CRDT merge keyed by vector clocks
    StateCrdt,
}

impl Default for SyncStrategy {
    fn default() -> Self {
        SyncStrategy::StateCrdt
    }
}

/// Conflict rule applied when a sync payload carries an entity id that
/// already exists locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictMode {
    /// Whole-entity replace: the incoming entity always wins. Replays are
    /// idempotent, but concurrent same-id edits applied in different orders
    /// can leave replicas on different values.
    Overwrite,
    /// Deterministic tie-break: keep the entity with the greater
    /// (version, creator broker id) pair. Order-independent.
    VersionOrigin,
}

impl Default for ConflictMode {
    fn default() -> Self {
        ConflictMode::VersionOrigin
    }
}

/// Access level a broker holds on a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessLevel {
    /// May observe federated resources
    Observe,
    /// May submit mutations for merge
    Contribute,
    /// May grant access to further brokers
    Admin,
}

/// Grant of access to a context for a partner broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    /// Context the grant applies to
    pub context_id: ContextId,

    /// Broker receiving access
    pub broker: BrokerId,

    /// Level granted
    pub level: AccessLevel,

    /// Broker that issued the grant
    pub granted_by: BrokerId,

    /// When the grant was issued
    pub granted_at: Timestamp,

    /// Optional expiry; a lapsed grant no longer authorizes anything
    pub expires_at: Option<Timestamp>,
}

impl AccessEntry {
    /// Whether the grant is live at `now`
    pub fn is_active(&self, now: Timestamp) -> bool {
        match self.expires_at {
            Some(expiry) => now < expiry,
            None => true,
        }
    }
}
