/*
    sync_round.rs - Sync round payload

    A sync round ships the initiator's full node/edge maps plus its
    vector clock to every other participant. State-based replication:
    the receiver merges the whole payload, it never applies diffs.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core_context::crdt::vector_clock::VectorClock;
use crate::core_context::model::context::SharedContext;
use crate::core_context::model::entity::{ContextEdge, ContextNode};
use crate::core_context::model::types::{BrokerId, ContextId, EntityId, Timestamp};
use crate::core_context::store::errors::ContextResult;

/// Full-state payload shipped by one sync round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub context_id: ContextId,

    /// Broker driving the round
    pub initiator: BrokerId,

    /// Initiator's own clock counter after the round's increment
    pub round: u64,

    /// Initiator's context version after the round's increment
    pub context_version: u64,

    pub nodes: HashMap<EntityId, ContextNode>,
    pub edges: HashMap<EntityId, ContextEdge>,
    pub vector_clock: VectorClock,

    pub sent_at: Timestamp,
}

impl SyncPayload {
    /// Capture the initiator's current state. Call after
    /// `SharedContext::start_sync_round` so the clock already carries
    /// the round's increment.
    pub fn from_context(context: &SharedContext, initiator: &BrokerId) -> Self {
        SyncPayload {
            context_id: context.id.clone(),
            initiator: initiator.clone(),
            round: context.vector_clock.get(initiator.as_str()),
            context_version: context.version,
            nodes: context.nodes.clone(),
            edges: context.edges.clone(),
            vector_clock: context.vector_clock.clone(),
            sent_at: Timestamp::now(),
        }
    }

    pub fn entity_count(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }

    /// Encode for an envelope body
    pub fn to_json(&self) -> ContextResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode from an envelope body
    pub fn from_json(value: Value) -> ContextResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_context::model::entity::ContextNode;
    use serde_json::json;

    #[test]
    fn test_from_context_captures_round() {
        let a = BrokerId::from("did:web:a.example");
        let mut ctx = SharedContext::new("Alpha".to_string(), a.clone());
        ctx.insert_node(ContextNode::new("task".to_string(), json!({}), a.clone()));

        ctx.start_sync_round(&a);
        let payload = SyncPayload::from_context(&ctx, &a);

        assert_eq!(payload.round, 2); // {a:1} at creation, +1 for the round
        assert_eq!(payload.context_version, ctx.version);
        assert_eq!(payload.nodes.len(), 1);
        assert_eq!(payload.entity_count(), 1);
        assert_eq!(payload.vector_clock, ctx.vector_clock);
    }

    #[test]
    fn test_json_round_trip() {
        let a = BrokerId::from("did:web:a.example");
        let mut ctx = SharedContext::new("Alpha".to_string(), a.clone());
        ctx.insert_node(ContextNode::new(
            "task".to_string(),
            json!({"title": "t"}),
            a.clone(),
        ));
        ctx.start_sync_round(&a);

        let payload = SyncPayload::from_context(&ctx, &a);
        let encoded = payload.to_json().unwrap();
        let decoded = SyncPayload::from_json(encoded).unwrap();

        assert_eq!(decoded, payload);
    }
}
