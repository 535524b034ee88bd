/*
    entity.rs - Graph entities stored inside a shared context

    A shared context is a graph of nodes and edges. Both carry:
    - A context-unique id
    - A free-form JSON payload
    - Origin metadata (creating broker, creation time)
    - A version counter used by the deterministic conflict rule

    Merge treats entities as whole units: an incoming entity either
    replaces the local one or is dropped, never field-merged.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{BrokerId, EntityId, Timestamp};

/// Which kind of graph entity a change refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Node,
    Edge,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Node => write!(f, "node"),
            EntityKind::Edge => write!(f, "edge"),
        }
    }
}

/// A node in a shared context graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextNode {
    /// Unique within the owning context
    pub id: EntityId,

    /// Application-defined node type, e.g. "task" or "document"
    pub node_type: String,

    /// Free-form JSON payload
    pub data: Value,

    /// Broker that created this node
    pub created_by: BrokerId,

    /// Creation time at the originating broker
    pub created_at: Timestamp,

    /// Bumped on every local update; drives the version-origin tie-break
    pub version: u64,
}

impl ContextNode {
    pub fn new(node_type: String, data: Value, created_by: BrokerId) -> Self {
        ContextNode {
            id: EntityId::generate(),
            node_type,
            data,
            created_by,
            created_at: Timestamp::now(),
            version: 1,
        }
    }

    /// Replace the payload and bump the version
    pub fn update(&mut self, data: Value) {
        self.data = data;
        self.version += 1;
    }
}

/// A directed edge between two nodes of the same context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEdge {
    /// Unique within the owning context
    pub id: EntityId,

    /// Source node
    pub from: EntityId,

    /// Target node
    pub to: EntityId,

    /// Application-defined edge type, e.g. "depends-on"
    pub edge_type: String,

    /// Optional free-form JSON payload
    pub data: Option<Value>,

    /// Broker that created this edge
    pub created_by: BrokerId,

    /// Creation time at the originating broker
    pub created_at: Timestamp,

    /// Bumped on every local update; drives the version-origin tie-break
    pub version: u64,
}

impl ContextEdge {
    pub fn new(
        from: EntityId,
        to: EntityId,
        edge_type: String,
        data: Option<Value>,
        created_by: BrokerId,
    ) -> Self {
        ContextEdge {
            id: EntityId::generate(),
            from,
            to,
            edge_type,
            data,
            created_by,
            created_at: Timestamp::now(),
            version: 1,
        }
    }

    /// Replace the payload and bump the version
    pub fn update(&mut self, data: Option<Value>) {
        self.data = data;
        self.version += 1;
    }
}

/// Deterministic ordering key for same-id conflicts: higher version wins,
/// creator DID breaks exact version ties. Total and symmetric, so replicas
/// applying the same pair in either order keep the same entity.
pub fn version_origin_key(version: u64, created_by: &BrokerId) -> (u64, String) {
    (version, created_by.0.clone())
}
