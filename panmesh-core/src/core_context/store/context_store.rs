/*
    context_store.rs - Shared context store

    Owns every SharedContext replica this broker holds and drives all
    mutations against them:
    - Context creation and participant management
    - Local node/edge mutations
    - Sync rounds, both driven (begin) and received (apply)
    - Access grants controlling who may be offered a context

    Concurrency: one logical critical section per context id. The outer
    map is read-locked briefly to fetch an Arc'd entry; the per-context
    mutex serializes all work on that context while operations on other
    contexts proceed in parallel.

    Mutations are applied to a clone and committed only after the change
    log and relational image accept them, so a failed durable write
    leaves the in-memory state unchanged. Every successful mutating
    operation emits exactly one provenance trace; failures emit none.
*/

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::core_context::model::context::{AppliedChange, ContextSnapshot, SharedContext};
use crate::core_context::model::entity::{ContextEdge, ContextNode};
use crate::core_context::model::types::{
    AccessEntry, AccessLevel, BrokerId, ConflictMode, ContextId, EntityId, Timestamp, Visibility,
};
use crate::core_context::store::change_log::{ChangeLog, ChangeLogEntry};
use crate::core_context::store::errors::{ContextError, ContextResult};
use crate::core_context::sync::replica::{ContextReplica, ReplicaTracker, SyncStatus};
use crate::core_context::sync::sync_round::SyncPayload;
use crate::provenance::{ProvenanceTrace, TraceOperation, TraceSink};
use crate::storage::SqlStore;

/// Store for every shared context this broker participates in
pub struct SharedContextStore {
    local_broker: BrokerId,
    contexts: RwLock<HashMap<ContextId, Arc<Mutex<SharedContext>>>>,
    access: RwLock<HashMap<ContextId, Vec<AccessEntry>>>,
    replicas: Mutex<ReplicaTracker>,
    change_log: Mutex<ChangeLog>,
    storage: Option<Arc<SqlStore>>,
    traces: TraceSink,
}

impl SharedContextStore {
    pub fn new(local_broker: BrokerId, change_log: ChangeLog, traces: TraceSink) -> Self {
        SharedContextStore {
            local_broker,
            contexts: RwLock::new(HashMap::new()),
            access: RwLock::new(HashMap::new()),
            replicas: Mutex::new(ReplicaTracker::new()),
            change_log: Mutex::new(change_log),
            storage: None,
            traces,
        }
    }

    /// Attach a relational image that mirrors every aggregate
    pub fn with_storage(mut self, storage: Arc<SqlStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn local_broker(&self) -> &BrokerId {
        &self.local_broker
    }

    /// Rebuild in-memory state from the relational image. Returns the
    /// number of contexts loaded.
    pub async fn hydrate(&self) -> ContextResult<usize> {
        let Some(storage) = &self.storage else {
            return Ok(0);
        };

        let ids = storage.list_context_ids()?;
        let mut loaded = 0;

        for id in ids {
            let Some(context) = storage.load_context(&id)? else {
                continue;
            };

            {
                let mut contexts = self.contexts.write().await;
                contexts.insert(id.clone(), Arc::new(Mutex::new(context)));
            }

            let mut replicas = self.replicas.lock().await;
            for replica in storage.load_replicas(&id)? {
                replicas.restore(replica);
            }
            drop(replicas);

            let entries = storage.load_access_entries(&id)?;
            if !entries.is_empty() {
                self.access.write().await.insert(id.clone(), entries);
            }

            loaded += 1;
        }

        info!(contexts = loaded, "hydrated shared-context store");
        Ok(loaded)
    }

    // ===== Context lifecycle =====

    /// Create a context owned by this broker: version 1, clock {owner: 1}
    pub async fn create_context(&self, name: &str) -> ContextResult<ContextId> {
        self.create_context_with_mode(name, ConflictMode::default()).await
    }

    pub async fn create_context_with_mode(
        &self,
        name: &str,
        conflict_mode: ConflictMode,
    ) -> ContextResult<ContextId> {
        let mut context = SharedContext::new(name.to_string(), self.local_broker.clone());
        context.conflict_mode = conflict_mode;
        let id = context.id.clone();

        self.persist_context(&context)?;
        {
            let mut contexts = self.contexts.write().await;
            contexts.insert(id.clone(), Arc::new(Mutex::new(context)));
        }

        info!(context_id = %id, name = name, "created shared context");
        self.traces.emit(ProvenanceTrace::new(
            TraceOperation::CreateContext,
            self.local_broker.clone(),
            id.to_string(),
            json!({ "name": name }),
            json!({ "version": 1 }),
        ));

        Ok(id)
    }

    /// Add a broker to the participant list, seeding its clock entry at
    /// 0. Returns the full-state snapshot to transfer to the new
    /// participant.
    pub async fn add_participant(
        &self,
        context_id: &ContextId,
        broker: &BrokerId,
    ) -> ContextResult<ContextSnapshot> {
        let entry = self.context_entry(context_id).await?;
        let mut guard = entry.lock().await;

        if guard.is_participant(broker) {
            return Err(ContextError::Duplicate(format!(
                "{} is already a participant of {}",
                broker, context_id
            )));
        }

        let mut work = guard.clone();
        work.add_participant(broker.clone());

        self.persist_context(&work)?;
        *guard = work;

        let snapshot = guard.snapshot();
        drop(guard);

        // State transfer accompanies the add, so the replica records as
        // synced at the current clock
        let mut replicas = self.replicas.lock().await;
        replicas.register(context_id.clone(), broker.clone());
        replicas.record_sync(
            context_id,
            broker,
            snapshot.version,
            snapshot.vector_clock.clone(),
            &snapshot.vector_clock,
        );
        let replica = replicas.get(context_id, broker).cloned();
        drop(replicas);
        if let Some(replica) = replica {
            self.persist_replica(&replica)?;
        }

        info!(context_id = %context_id, broker = %broker, "added participant");
        self.traces.emit(ProvenanceTrace::new(
            TraceOperation::AddParticipant,
            self.local_broker.clone(),
            context_id.to_string(),
            json!({ "broker": broker.as_str() }),
            json!({
                "participants": snapshot.participants.len(),
                "version": snapshot.version,
            }),
        ));

        Ok(snapshot)
    }

    /// Receiver half of a participant add: install the transferred
    /// snapshot as this broker's replica of the context.
    pub async fn adopt_snapshot(&self, snapshot: ContextSnapshot) -> ContextResult<()> {
        let context_id = snapshot.context_id.clone();

        let existing = {
            let contexts = self.contexts.read().await;
            contexts.get(&context_id).cloned()
        };

        match existing {
            Some(entry) => {
                // Re-transfer: fold the snapshot in like a sync payload
                let mut guard = entry.lock().await;
                let mut work = guard.clone();
                work.apply_remote(&snapshot.nodes, &snapshot.edges, &snapshot.vector_clock);
                for broker in &snapshot.participants {
                    if !work.is_participant(broker) {
                        work.add_participant(broker.clone());
                    }
                }
                self.persist_context(&work)?;
                *guard = work;
            }
            None => {
                let context = SharedContext {
                    id: snapshot.context_id.clone(),
                    name: snapshot.name.clone(),
                    description: None,
                    owner: snapshot.owner.clone(),
                    participants: snapshot.participants.clone(),
                    visibility: snapshot.visibility,
                    sync_strategy: Default::default(),
                    conflict_mode: ConflictMode::default(),
                    version: snapshot.version,
                    vector_clock: snapshot.vector_clock.clone(),
                    nodes: snapshot.nodes.clone(),
                    edges: snapshot.edges.clone(),
                    created_at: Timestamp::now(),
                    updated_at: Timestamp::now(),
                };
                self.persist_context(&context)?;
                let mut contexts = self.contexts.write().await;
                contexts.insert(context_id.clone(), Arc::new(Mutex::new(context)));
            }
        }

        let mut replicas = self.replicas.lock().await;
        for broker in &snapshot.participants {
            if broker != &self.local_broker {
                replicas.register(context_id.clone(), broker.clone());
            }
        }
        drop(replicas);

        info!(context_id = %context_id, owner = %snapshot.owner, "adopted context snapshot");
        self.traces.emit(ProvenanceTrace::new(
            TraceOperation::AddParticipant,
            self.local_broker.clone(),
            context_id.to_string(),
            json!({ "transfer": "snapshot", "owner": snapshot.owner.as_str() }),
            json!({ "version": snapshot.version, "entities": snapshot.nodes.len() + snapshot.edges.len() }),
        ));

        Ok(())
    }

    // ===== Local mutations =====

    /// Create a node in a context. Invisible to other participants until
    /// a sync round ships it.
    pub async fn add_node(
        &self,
        context_id: &ContextId,
        node_type: &str,
        data: Value,
    ) -> ContextResult<EntityId> {
        let entry = self.context_entry(context_id).await?;
        let mut guard = entry.lock().await;
        self.require_participant(&guard)?;

        let mut work = guard.clone();
        let node = ContextNode::new(node_type.to_string(), data, self.local_broker.clone());
        let node_id = node.id.clone();
        let change = work.insert_node(node).ok_or_else(|| {
            ContextError::Duplicate(format!("node {} already exists", node_id))
        })?;

        self.commit_local_change(&mut guard, work, context_id, &change).await?;
        drop(guard);

        debug!(context_id = %context_id, node_id = %node_id, node_type, "added node");
        self.emit_mutation_trace(context_id, &change, json!({ "node_type": node_type }));

        Ok(node_id)
    }

    /// Replace a node's payload, bumping its entity version
    pub async fn update_node(
        &self,
        context_id: &ContextId,
        node_id: &EntityId,
        data: Value,
    ) -> ContextResult<()> {
        let entry = self.context_entry(context_id).await?;
        let mut guard = entry.lock().await;
        self.require_participant(&guard)?;

        let mut work = guard.clone();
        let change = work
            .update_node(node_id, data)
            .ok_or_else(|| ContextError::NotFound(format!("node {}", node_id)))?;

        self.commit_local_change(&mut guard, work, context_id, &change).await?;
        drop(guard);

        debug!(context_id = %context_id, node_id = %node_id, "updated node");
        self.emit_mutation_trace(context_id, &change, json!({}));

        Ok(())
    }

    /// Create an edge between two existing nodes of the same context
    pub async fn add_edge(
        &self,
        context_id: &ContextId,
        from: &EntityId,
        to: &EntityId,
        edge_type: &str,
        data: Option<Value>,
    ) -> ContextResult<EntityId> {
        let entry = self.context_entry(context_id).await?;
        let mut guard = entry.lock().await;
        self.require_participant(&guard)?;

        if !guard.node_exists(from) {
            return Err(ContextError::Validation(format!(
                "edge source node {} does not exist",
                from
            )));
        }
        if !guard.node_exists(to) {
            return Err(ContextError::Validation(format!(
                "edge target node {} does not exist",
                to
            )));
        }

        let mut work = guard.clone();
        let edge = ContextEdge::new(
            from.clone(),
            to.clone(),
            edge_type.to_string(),
            data,
            self.local_broker.clone(),
        );
        let edge_id = edge.id.clone();
        let change = work.insert_edge(edge).ok_or_else(|| {
            ContextError::Duplicate(format!("edge {} already exists", edge_id))
        })?;

        self.commit_local_change(&mut guard, work, context_id, &change).await?;
        drop(guard);

        debug!(context_id = %context_id, edge_id = %edge_id, edge_type, "added edge");
        self.emit_mutation_trace(context_id, &change, json!({ "edge_type": edge_type }));

        Ok(edge_id)
    }

    /// Replace an edge's payload, bumping its entity version
    pub async fn update_edge(
        &self,
        context_id: &ContextId,
        edge_id: &EntityId,
        data: Option<Value>,
    ) -> ContextResult<()> {
        let entry = self.context_entry(context_id).await?;
        let mut guard = entry.lock().await;
        self.require_participant(&guard)?;

        let mut work = guard.clone();
        let change = work
            .update_edge(edge_id, data)
            .ok_or_else(|| ContextError::NotFound(format!("edge {}", edge_id)))?;

        self.commit_local_change(&mut guard, work, context_id, &change).await?;
        drop(guard);

        debug!(context_id = %context_id, edge_id = %edge_id, "updated edge");
        self.emit_mutation_trace(context_id, &change, json!({}));

        Ok(())
    }

    // ===== Sync rounds =====

    /// Drive a sync round as the initiator: the local clock counter and
    /// context version each advance by exactly one, and the returned
    /// payload carries the full post-increment state for delivery to
    /// every other participant.
    pub async fn begin_sync_round(&self, context_id: &ContextId) -> ContextResult<SyncPayload> {
        let entry = self.context_entry(context_id).await?;
        let mut guard = entry.lock().await;
        self.require_participant(&guard)?;

        let mut work = guard.clone();
        work.start_sync_round(&self.local_broker);

        self.persist_context(&work)?;
        *guard = work;

        let payload = SyncPayload::from_context(&guard, &self.local_broker);
        drop(guard);

        debug!(
            context_id = %context_id,
            round = payload.round,
            entities = payload.entity_count(),
            "began sync round"
        );
        metrics::counter!("panmesh_sync_rounds_total").increment(1);
        self.traces.emit(ProvenanceTrace::new(
            TraceOperation::SyncRound,
            self.local_broker.clone(),
            context_id.to_string(),
            json!({ "role": "initiator", "round": payload.round }),
            json!({
                "entities": payload.entity_count(),
                "version": payload.context_version,
            }),
        ));

        Ok(payload)
    }

    /// Apply a payload received from a sync round another broker drove.
    /// Merge is idempotent: replaying an identical payload changes
    /// nothing and logs nothing.
    pub async fn apply_sync_payload(
        &self,
        payload: &SyncPayload,
    ) -> ContextResult<Vec<AppliedChange>> {
        let entry = self.context_entry(&payload.context_id).await?;
        let mut guard = entry.lock().await;

        if !guard.is_participant(&payload.initiator) {
            return Err(ContextError::Validation(format!(
                "sync initiator {} is not a participant of {}",
                payload.initiator, payload.context_id
            )));
        }

        let mut work = guard.clone();
        let changes = work.apply_remote(&payload.nodes, &payload.edges, &payload.vector_clock);

        if !changes.is_empty() {
            let mut log = self.change_log.lock().await;
            for change in &changes {
                log.append(&payload.context_id, &payload.initiator, &work.vector_clock, change)?;
            }
        }

        self.persist_context(&work)?;
        *guard = work;

        let merged_clock = guard.vector_clock.clone();
        let local_version = guard.version;
        drop(guard);

        let mut replicas = self.replicas.lock().await;
        let status = replicas.record_sync(
            &payload.context_id,
            &payload.initiator,
            payload.context_version,
            payload.vector_clock.clone(),
            &merged_clock,
        );
        let replica = replicas.get(&payload.context_id, &payload.initiator).cloned();
        drop(replicas);
        if let Some(replica) = replica {
            self.persist_replica(&replica)?;
        }

        debug!(
            context_id = %payload.context_id,
            initiator = %payload.initiator,
            applied = changes.len(),
            status = %status,
            "applied sync payload"
        );
        metrics::counter!("panmesh_sync_applies_total").increment(1);
        self.traces.emit(ProvenanceTrace::new(
            TraceOperation::SyncRound,
            payload.initiator.clone(),
            payload.context_id.to_string(),
            json!({ "role": "receiver", "round": payload.round }),
            json!({ "applied": changes.len(), "version": local_version }),
        ));

        Ok(changes)
    }

    /// Record the post-merge state a partner reported after receiving a
    /// round. Divergence surfaces as a warning, never an error.
    pub async fn record_replica_ack(
        &self,
        context_id: &ContextId,
        broker: &BrokerId,
        reported_version: u64,
        reported_clock: crate::core_context::crdt::vector_clock::VectorClock,
    ) -> ContextResult<SyncStatus> {
        let entry = self.context_entry(context_id).await?;
        let authoritative = {
            let guard = entry.lock().await;
            guard.vector_clock.clone()
        };

        let mut replicas = self.replicas.lock().await;
        let status = replicas.record_sync(
            context_id,
            broker,
            reported_version,
            reported_clock,
            &authoritative,
        );
        let replica = replicas.get(context_id, broker).cloned();
        drop(replicas);
        if let Some(replica) = replica {
            self.persist_replica(&replica)?;
        }

        Ok(status)
    }

    // ===== Access control =====

    /// Grant a partner broker access to a context. Only the owner or an
    /// Admin grantee may grant.
    pub async fn grant_access(
        &self,
        context_id: &ContextId,
        broker: &BrokerId,
        level: AccessLevel,
        expires_at: Option<Timestamp>,
    ) -> ContextResult<()> {
        let entry = self.context_entry(context_id).await?;
        let owner = {
            let guard = entry.lock().await;
            guard.owner.clone()
        };
        self.require_grant_authority(context_id, &owner).await?;

        let access_entry = AccessEntry {
            context_id: context_id.clone(),
            broker: broker.clone(),
            level,
            granted_by: self.local_broker.clone(),
            granted_at: Timestamp::now(),
            expires_at,
        };

        if let Some(storage) = &self.storage {
            storage.upsert_access(&access_entry)?;
        }

        let mut access = self.access.write().await;
        let entries = access.entry(context_id.clone()).or_default();
        entries.retain(|e| &e.broker != broker);
        entries.push(access_entry);
        drop(access);

        info!(context_id = %context_id, broker = %broker, level = ?level, "granted access");
        self.traces.emit(ProvenanceTrace::new(
            TraceOperation::GrantAccess,
            self.local_broker.clone(),
            context_id.to_string(),
            json!({ "broker": broker.as_str(), "level": format!("{:?}", level) }),
            json!({}),
        ));

        Ok(())
    }

    /// Remove a partner's access grant
    pub async fn revoke_access(
        &self,
        context_id: &ContextId,
        broker: &BrokerId,
    ) -> ContextResult<()> {
        let entry = self.context_entry(context_id).await?;
        let owner = {
            let guard = entry.lock().await;
            guard.owner.clone()
        };
        self.require_grant_authority(context_id, &owner).await?;

        let mut access = self.access.write().await;
        let entries = access
            .get_mut(context_id)
            .ok_or_else(|| ContextError::NotFound(format!("no grants for {}", context_id)))?;
        let before = entries.len();
        entries.retain(|e| &e.broker != broker);
        if entries.len() == before {
            return Err(ContextError::NotFound(format!(
                "no grant for {} on {}",
                broker, context_id
            )));
        }
        drop(access);

        if let Some(storage) = &self.storage {
            storage.delete_access(context_id, broker)?;
        }

        info!(context_id = %context_id, broker = %broker, "revoked access");
        self.traces.emit(ProvenanceTrace::new(
            TraceOperation::RevokeAccess,
            self.local_broker.clone(),
            context_id.to_string(),
            json!({ "broker": broker.as_str() }),
            json!({}),
        ));

        Ok(())
    }

    /// Whether a context may be offered to `broker` during federation.
    /// Owner and participants always qualify; otherwise an unexpired
    /// grant or Public visibility is required. Trust checks are the
    /// router's concern, layered on top of this.
    pub async fn may_offer(&self, context_id: &ContextId, broker: &BrokerId) -> ContextResult<bool> {
        let entry = self.context_entry(context_id).await?;
        let (owner, visibility, is_participant) = {
            let guard = entry.lock().await;
            (guard.owner.clone(), guard.visibility, guard.is_participant(broker))
        };

        if &owner == broker || is_participant {
            return Ok(true);
        }

        match visibility {
            Visibility::Private => Ok(false),
            Visibility::Public => Ok(true),
            Visibility::Participants => {
                let access = self.access.read().await;
                let now = Timestamp::now();
                Ok(access
                    .get(context_id)
                    .map(|entries| {
                        entries.iter().any(|e| &e.broker == broker && e.is_active(now))
                    })
                    .unwrap_or(false))
            }
        }
    }

    // ===== Read-only accessors =====

    /// Read-only full-state view; never mutates clocks or versions
    pub async fn get_snapshot(&self, context_id: &ContextId) -> ContextResult<ContextSnapshot> {
        let entry = self.context_entry(context_id).await?;
        let guard = entry.lock().await;
        Ok(guard.snapshot())
    }

    pub async fn list_contexts(&self) -> Vec<ContextId> {
        let contexts = self.contexts.read().await;
        contexts.keys().cloned().collect()
    }

    pub async fn context_count(&self) -> usize {
        self.contexts.read().await.len()
    }

    /// Change-log entries recorded for one context, in log order
    pub async fn change_log_entries(
        &self,
        context_id: &ContextId,
    ) -> ContextResult<Vec<ChangeLogEntry>> {
        let log = self.change_log.lock().await;
        log.entries_for_context(context_id)
    }

    /// Replica records for one context
    pub async fn replicas_for_context(&self, context_id: &ContextId) -> Vec<ContextReplica> {
        let replicas = self.replicas.lock().await;
        replicas
            .replicas_for_context(context_id)
            .into_iter()
            .cloned()
            .collect()
    }

    // ===== Internals =====

    async fn context_entry(&self, context_id: &ContextId) -> ContextResult<Arc<Mutex<SharedContext>>> {
        let contexts = self.contexts.read().await;
        contexts
            .get(context_id)
            .cloned()
            .ok_or_else(|| ContextError::NotFound(format!("context {}", context_id)))
    }

    fn require_participant(&self, context: &SharedContext) -> ContextResult<()> {
        if !context.is_participant(&self.local_broker) {
            return Err(ContextError::PermissionDenied(format!(
                "{} is not a participant of {}",
                self.local_broker, context.id
            )));
        }
        Ok(())
    }

    async fn require_grant_authority(
        &self,
        context_id: &ContextId,
        owner: &BrokerId,
    ) -> ContextResult<()> {
        if owner == &self.local_broker {
            return Ok(());
        }
        let access = self.access.read().await;
        let now = Timestamp::now();
        let is_admin = access
            .get(context_id)
            .map(|entries| {
                entries.iter().any(|e| {
                    e.broker == self.local_broker
                        && e.level == AccessLevel::Admin
                        && e.is_active(now)
                })
            })
            .unwrap_or(false);
        if !is_admin {
            return Err(ContextError::PermissionDenied(format!(
                "{} may not manage grants on {}",
                self.local_broker, context_id
            )));
        }
        Ok(())
    }

    /// Log the change, persist the worked copy, then commit it.
    /// The guard is only replaced once every durable step succeeded.
    async fn commit_local_change(
        &self,
        guard: &mut SharedContext,
        work: SharedContext,
        context_id: &ContextId,
        change: &AppliedChange,
    ) -> ContextResult<()> {
        {
            let mut log = self.change_log.lock().await;
            log.append(context_id, &self.local_broker, &work.vector_clock, change)?;
        }
        self.persist_context(&work)?;
        *guard = work;
        Ok(())
    }

    fn emit_mutation_trace(&self, context_id: &ContextId, change: &AppliedChange, extra: Value) {
        let mut inputs = json!({
            "change": change.change.to_string(),
            "target_kind": change.after.kind().to_string(),
        });
        if let (Value::Object(inputs_map), Value::Object(extra_map)) = (&mut inputs, extra) {
            inputs_map.extend(extra_map);
        }
        self.traces.emit(ProvenanceTrace::new(
            TraceOperation::LocalMutation,
            self.local_broker.clone(),
            context_id.to_string(),
            inputs,
            json!({ "entity_id": change.after.entity_id().to_string() }),
        ));
    }

    fn persist_context(&self, context: &SharedContext) -> ContextResult<()> {
        if let Some(storage) = &self.storage {
            storage.upsert_context(context)?;
        }
        Ok(())
    }

    fn persist_replica(&self, replica: &ContextReplica) -> ContextResult<()> {
        if let Some(storage) = &self.storage {
            storage.upsert_replica(replica)?;
        }
        Ok(())
    }
}
