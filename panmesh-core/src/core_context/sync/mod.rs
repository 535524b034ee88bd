/*
    Sync subsystem - Sync rounds and replica tracking

    Handles propagation and reconciliation of shared-context state.
*/

pub mod replica;
pub mod sync_round;

pub use replica::{ContextReplica, ReplicaTracker, SyncStatus};
pub use sync_round::SyncPayload;
