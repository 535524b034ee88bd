/*
    replica.rs - Per-(context, broker) replica tracking

    Records what each participating broker is known to hold for a context:
    local version, last observed vector clock, sync status, last sync time.

    A replica is diverged when any counter it holds exceeds the owning
    context's corresponding counter. Divergence is a consistency alarm:
    logged and counted, never fatal, and never blocks later sync rounds.
*/

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::core_context::crdt::vector_clock::VectorClock;
use crate::core_context::model::types::{BrokerId, ContextId, Timestamp};

/// Sync state of one broker's replica of one context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Registered but no state transfer observed yet
    Pending,
    /// Clock consistent with the owning context
    Synced,
    /// Holds a counter ahead of the owning context
    Diverged,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "pending"),
            SyncStatus::Synced => write!(f, "synced"),
            SyncStatus::Diverged => write!(f, "diverged"),
        }
    }
}

/// What one broker is known to hold for one context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextReplica {
    pub context_id: ContextId,
    pub broker: BrokerId,

    /// Context version last reported by this broker
    pub local_version: u64,

    /// Vector clock last reported by this broker
    pub observed_clock: VectorClock,

    pub status: SyncStatus,

    /// When this broker last took part in a sync round
    pub last_sync_at: Option<Timestamp>,
}

impl ContextReplica {
    fn new(context_id: ContextId, broker: BrokerId) -> Self {
        ContextReplica {
            context_id,
            broker,
            local_version: 0,
            observed_clock: VectorClock::new(),
            status: SyncStatus::Pending,
            last_sync_at: None,
        }
    }
}

/// True if `observed` holds any counter ahead of `authoritative`
pub fn is_diverged(observed: &VectorClock, authoritative: &VectorClock) -> bool {
    observed
        .brokers()
        .iter()
        .any(|b| observed.get(b) > authoritative.get(b))
}

/// Tracks replicas across every (context, broker) pair this instance
/// participates in. Owned per broker instance, never process-global.
#[derive(Debug, Default)]
pub struct ReplicaTracker {
    replicas: HashMap<(ContextId, BrokerId), ContextReplica>,
}

impl ReplicaTracker {
    pub fn new() -> Self {
        ReplicaTracker {
            replicas: HashMap::new(),
        }
    }

    /// Register a replica in Pending state. Idempotent: an existing
    /// record is left untouched.
    pub fn register(&mut self, context_id: ContextId, broker: BrokerId) {
        self.replicas
            .entry((context_id.clone(), broker.clone()))
            .or_insert_with(|| ContextReplica::new(context_id, broker));
    }

    /// Reinstate a replica record loaded from storage
    pub fn restore(&mut self, replica: ContextReplica) {
        self.replicas
            .insert((replica.context_id.clone(), replica.broker.clone()), replica);
    }

    pub fn get(&self, context_id: &ContextId, broker: &BrokerId) -> Option<&ContextReplica> {
        self.replicas.get(&(context_id.clone(), broker.clone()))
    }

    /// Record the state a broker reported after a sync round and classify
    /// it against the owning context's clock. Divergence is downgraded to
    /// a warning plus a counter, never an error.
    pub fn record_sync(
        &mut self,
        context_id: &ContextId,
        broker: &BrokerId,
        local_version: u64,
        observed_clock: VectorClock,
        authoritative_clock: &VectorClock,
    ) -> SyncStatus {
        let status = if is_diverged(&observed_clock, authoritative_clock) {
            warn!(
                context_id = %context_id,
                broker = %broker,
                "replica clock ahead of owning context"
            );
            metrics::counter!("panmesh_replica_divergence_total").increment(1);
            SyncStatus::Diverged
        } else {
            SyncStatus::Synced
        };

        let replica = self
            .replicas
            .entry((context_id.clone(), broker.clone()))
            .or_insert_with(|| ContextReplica::new(context_id.clone(), broker.clone()));

        replica.local_version = local_version;
        replica.observed_clock = observed_clock;
        replica.status = status;
        replica.last_sync_at = Some(Timestamp::now());

        status
    }

    /// All replicas of one context
    pub fn replicas_for_context(&self, context_id: &ContextId) -> Vec<&ContextReplica> {
        self.replicas
            .values()
            .filter(|r| &r.context_id == context_id)
            .collect()
    }

    /// Drop every replica record for a removed context
    pub fn remove_context(&mut self, context_id: &ContextId) {
        self.replicas.retain(|(cid, _), _| cid != context_id);
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }
}
