/*
    core_context - Shared context state layer

    The authoritative state layer for contexts collaboratively edited
    across federated brokers. Handles:
    - Data models (contexts, nodes, edges, access grants)
    - Vector-clock CRDT replication
    - Local persistence and the append-only change log
    - Sync rounds and replica tracking
*/

pub mod crdt;
pub mod model;
pub mod store;
pub mod sync;

#[cfg(test)]
pub mod tests;

// Re-export commonly used types
pub use crdt::VectorClock;
pub use model::{
    BrokerId, ConflictMode, ContextId, EntityId, SharedContext, Timestamp, Visibility,
};
pub use store::{ChangeLog, ContextError, ContextResult, SharedContextStore};
pub use sync::{ContextReplica, ReplicaTracker, SyncPayload, SyncStatus};
