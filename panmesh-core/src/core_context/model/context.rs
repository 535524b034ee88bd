/*
    context.rs - SharedContext aggregate

    A SharedContext is a collaboratively edited graph replicated across
    participant brokers. It owns:
    - The node and edge maps, keyed by entity id
    - The participant list (owner first, join order preserved)
    - The vector clock and integer version
    - The conflict rule applied to same-id entities during merge

    Creation initializes version 1 and clock {owner: 1}. A driven sync
    round bumps the owner-side clock by exactly one; applying a remote
    payload merges entities per the conflict mode and merges clocks by
    pointwise maximum.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::entity::{version_origin_key, ContextEdge, ContextNode, EntityKind};
use super::types::{BrokerId, ConflictMode, ContextId, EntityId, SyncStrategy, Timestamp, Visibility};
use crate::core_context::crdt::vector_clock::VectorClock;

/// How an applied change altered the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Entity created locally
    Created,
    /// Entity updated locally
    Updated,
    /// Entity replaced or introduced by a remote merge
    Merged,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "created"),
            ChangeKind::Updated => write!(f, "updated"),
            ChangeKind::Merged => write!(f, "merged"),
        }
    }
}

/// Typed before/after capture of a single entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntitySnapshot {
    Node(ContextNode),
    Edge(ContextEdge),
}

impl EntitySnapshot {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntitySnapshot::Node(_) => EntityKind::Node,
            EntitySnapshot::Edge(_) => EntityKind::Edge,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        match self {
            EntitySnapshot::Node(n) => &n.id,
            EntitySnapshot::Edge(e) => &e.id,
        }
    }
}

/// One entity-level mutation, reported so the change log can record it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub change: ChangeKind,
    /// State before the change, None for newly created entities
    pub before: Option<EntitySnapshot>,
    /// State after the change
    pub after: EntitySnapshot,
}

/// Read-only full-state view of a context, used for state transfer to a
/// newly added participant and for exports. Taking one never mutates
/// clocks or versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub context_id: ContextId,
    pub name: String,
    pub owner: BrokerId,
    pub participants: Vec<BrokerId>,
    pub visibility: Visibility,
    pub version: u64,
    pub vector_clock: VectorClock,
    pub nodes: HashMap<EntityId, ContextNode>,
    pub edges: HashMap<EntityId, ContextEdge>,
    pub taken_at: Timestamp,
}

/// A collaboratively edited graph replicated across brokers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    /// Unique context identifier
    pub id: ContextId,

    /// Human-readable name
    pub name: String,

    /// Optional description
    pub description: Option<String>,

    /// Broker that created the context
    pub owner: BrokerId,

    /// Owner plus every broker the context was federated to, join order
    pub participants: Vec<BrokerId>,

    /// Who may see the context
    pub visibility: Visibility,

    /// Replication strategy
    pub sync_strategy: SyncStrategy,

    /// Rule for same-id entities arriving in a merge
    pub conflict_mode: ConflictMode,

    /// Bumped whenever a sync round changes this replica's state
    pub version: u64,

    /// Causal progress per participating broker
    pub vector_clock: VectorClock,

    /// Graph nodes keyed by entity id
    pub nodes: HashMap<EntityId, ContextNode>,

    /// Graph edges keyed by entity id
    pub edges: HashMap<EntityId, ContextEdge>,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SharedContext {
    /// Create a context owned by `owner`: version 1, clock {owner: 1}
    pub fn new(name: String, owner: BrokerId) -> Self {
        let mut clock = VectorClock::new();
        clock.increment(owner.as_str());

        let now = Timestamp::now();
        SharedContext {
            id: ContextId::generate(),
            name,
            description: None,
            owner: owner.clone(),
            participants: vec![owner],
            visibility: Visibility::default(),
            sync_strategy: SyncStrategy::default(),
            conflict_mode: ConflictMode::default(),
            version: 1,
            vector_clock: clock,
            nodes: HashMap::new(),
            edges: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_participant(&self, broker: &BrokerId) -> bool {
        self.participants.contains(broker)
    }

    /// Append a participant and seed its clock entry at 0.
    /// Returns false if the broker was already a participant.
    pub fn add_participant(&mut self, broker: BrokerId) -> bool {
        if self.is_participant(&broker) {
            return false;
        }
        self.vector_clock.observe_participant(broker.as_str());
        self.participants.push(broker);
        self.updated_at = Timestamp::now();
        true
    }

    /// Insert a brand-new node. Returns the change record, or None if the
    /// id is already taken.
    pub fn insert_node(&mut self, node: ContextNode) -> Option<AppliedChange> {
        if self.nodes.contains_key(&node.id) {
            return None;
        }
        let after = EntitySnapshot::Node(node.clone());
        self.nodes.insert(node.id.clone(), node);
        self.updated_at = Timestamp::now();
        Some(AppliedChange {
            change: ChangeKind::Created,
            before: None,
            after,
        })
    }

    /// Update an existing node's payload, bumping its entity version.
    pub fn update_node(&mut self, id: &EntityId, data: Value) -> Option<AppliedChange> {
        let node = self.nodes.get_mut(id)?;
        let before = EntitySnapshot::Node(node.clone());
        node.update(data);
        let after = EntitySnapshot::Node(node.clone());
        self.updated_at = Timestamp::now();
        Some(AppliedChange {
            change: ChangeKind::Updated,
            before: Some(before),
            after,
        })
    }

    /// Insert a brand-new edge. Both endpoints must already exist; edges
    /// arriving via merge skip this check and go through `apply_remote`.
    pub fn insert_edge(&mut self, edge: ContextEdge) -> Option<AppliedChange> {
        if self.edges.contains_key(&edge.id) {
            return None;
        }
        let after = EntitySnapshot::Edge(edge.clone());
        self.edges.insert(edge.id.clone(), edge);
        self.updated_at = Timestamp::now();
        Some(AppliedChange {
            change: ChangeKind::Created,
            before: None,
            after,
        })
    }

    /// Update an existing edge's payload, bumping its entity version.
    pub fn update_edge(&mut self, id: &EntityId, data: Option<Value>) -> Option<AppliedChange> {
        let edge = self.edges.get_mut(id)?;
        let before = EntitySnapshot::Edge(edge.clone());
        edge.update(data);
        let after = EntitySnapshot::Edge(edge.clone());
        self.updated_at = Timestamp::now();
        Some(AppliedChange {
            change: ChangeKind::Updated,
            before: Some(before),
            after,
        })
    }

    pub fn node_exists(&self, id: &EntityId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Start a sync round driven by `initiator`: bump the initiator's
    /// clock counter by exactly one and the context version by one.
    pub fn start_sync_round(&mut self, initiator: &BrokerId) {
        self.vector_clock.increment(initiator.as_str());
        self.version += 1;
        self.updated_at = Timestamp::now();
    }

    /// Merge a remote node/edge/clock state into this replica.
    ///
    /// Entities are whole units: per entity id, the conflict mode decides
    /// whether the incoming copy replaces the local one. Clocks merge by
    /// pointwise maximum. The version bumps only if anything changed, so
    /// replaying an identical payload is a no-op.
    pub fn apply_remote(
        &mut self,
        remote_nodes: &HashMap<EntityId, ContextNode>,
        remote_edges: &HashMap<EntityId, ContextEdge>,
        remote_clock: &VectorClock,
    ) -> Vec<AppliedChange> {
        let mut changes = Vec::new();

        for (id, incoming) in remote_nodes {
            // Decide under a shared borrow, then mutate
            let before = match self.nodes.get(id) {
                None => None,
                Some(local) => {
                    let wins = self.incoming_wins(
                        incoming.version,
                        &incoming.created_by,
                        local.version,
                        &local.created_by,
                        incoming != local,
                    );
                    if !wins {
                        continue;
                    }
                    Some(EntitySnapshot::Node(local.clone()))
                }
            };

            self.nodes.insert(id.clone(), incoming.clone());
            changes.push(AppliedChange {
                change: ChangeKind::Merged,
                before,
                after: EntitySnapshot::Node(incoming.clone()),
            });
        }

        for (id, incoming) in remote_edges {
            let before = match self.edges.get(id) {
                None => None,
                Some(local) => {
                    let wins = self.incoming_wins(
                        incoming.version,
                        &incoming.created_by,
                        local.version,
                        &local.created_by,
                        incoming != local,
                    );
                    if !wins {
                        continue;
                    }
                    Some(EntitySnapshot::Edge(local.clone()))
                }
            };

            self.edges.insert(id.clone(), incoming.clone());
            changes.push(AppliedChange {
                change: ChangeKind::Merged,
                before,
                after: EntitySnapshot::Edge(incoming.clone()),
            });
        }

        let clock_before = self.vector_clock.clone();
        self.vector_clock.merge(remote_clock);

        if !changes.is_empty() || self.vector_clock != clock_before {
            self.version += 1;
            self.updated_at = Timestamp::now();
        }

        changes
    }

    /// Conflict rule for an entity id present on both sides.
    ///
    /// Overwrite: incoming replaces local whenever their content differs
    /// (equal content is skipped so replays stay silent).
    /// VersionOrigin: incoming replaces local only when its
    /// (version, creator) key is strictly greater.
    fn incoming_wins(
        &self,
        incoming_version: u64,
        incoming_creator: &BrokerId,
        local_version: u64,
        local_creator: &BrokerId,
        content_differs: bool,
    ) -> bool {
        match self.conflict_mode {
            ConflictMode::Overwrite => content_differs,
            ConflictMode::VersionOrigin => {
                version_origin_key(incoming_version, incoming_creator)
                    > version_origin_key(local_version, local_creator)
            }
        }
    }

    /// Read-only full-state capture. Never mutates clocks or versions.
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            context_id: self.id.clone(),
            name: self.name.clone(),
            owner: self.owner.clone(),
            participants: self.participants.clone(),
            visibility: self.visibility,
            version: self.version,
            vector_clock: self.vector_clock.clone(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            taken_at: Timestamp::now(),
        }
    }
}
