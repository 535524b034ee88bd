/*
    types.rs - Broker facade types
*/

use crate::core_context::model::types::{BrokerId, ContextId};
use crate::core_context::sync::SyncStatus;

/// Outcome of one driven sync round across a context's replicas
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub context_id: ContextId,

    /// Remote replicas the round attempted to reach
    pub peers: usize,

    /// Deliveries that reached the peer and were accepted
    pub delivered: usize,

    /// Deliveries that failed (no active trust, no endpoint, transport)
    pub failed: usize,

    /// Per-peer sync status for peers that acknowledged with state
    pub statuses: Vec<(BrokerId, SyncStatus)>,
}

impl SyncReport {
    pub fn new(context_id: ContextId) -> Self {
        SyncReport {
            context_id,
            peers: 0,
            delivered: 0,
            failed: 0,
            statuses: Vec::new(),
        }
    }

    /// Every remote replica took the payload
    pub fn fully_delivered(&self) -> bool {
        self.failed == 0 && self.delivered == self.peers
    }
}
