/*
    provenance - Trace emission for mutating operations

    Every mutating operation that succeeds emits exactly one trace
    describing its inputs and outputs; failed operations emit nothing.
    Traces flow through an in-process channel to whatever collaborator
    stores or forwards them. The core never writes traces to disk or
    the network itself.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core_context::model::types::{BrokerId, Timestamp};

/// Mutating operations that produce a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceOperation {
    EstablishTrust,
    RevokeTrust,
    FederateContext,
    CreateContext,
    AddParticipant,
    LocalMutation,
    SyncRound,
    GrantAccess,
    RevokeAccess,
}

impl std::fmt::Display for TraceOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TraceOperation::EstablishTrust => "establish-trust",
            TraceOperation::RevokeTrust => "revoke-trust",
            TraceOperation::FederateContext => "federate-context",
            TraceOperation::CreateContext => "create-context",
            TraceOperation::AddParticipant => "add-participant",
            TraceOperation::LocalMutation => "local-mutation",
            TraceOperation::SyncRound => "sync-round",
            TraceOperation::GrantAccess => "grant-access",
            TraceOperation::RevokeAccess => "revoke-access",
        };
        write!(f, "{}", name)
    }
}

/// Record of one successful mutating operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceTrace {
    /// Unique trace id
    pub id: String,

    pub operation: TraceOperation,

    /// Broker that performed the operation
    pub actor: BrokerId,

    /// Primary object acted on (relationship id, context id, ...)
    pub subject: String,

    /// Operation inputs as free-form JSON
    pub inputs: Value,

    /// Operation outputs as free-form JSON
    pub outputs: Value,

    pub recorded_at: Timestamp,
}

impl ProvenanceTrace {
    pub fn new(
        operation: TraceOperation,
        actor: BrokerId,
        subject: String,
        inputs: Value,
        outputs: Value,
    ) -> Self {
        ProvenanceTrace {
            id: uuid::Uuid::new_v4().to_string(),
            operation,
            actor,
            subject,
            inputs,
            outputs,
            recorded_at: Timestamp::now(),
        }
    }
}

/// Sending half of the trace channel, cloned into every component that
/// emits traces
#[derive(Debug, Clone)]
pub struct TraceSink {
    tx: mpsc::UnboundedSender<ProvenanceTrace>,
}

impl TraceSink {
    /// Create a sink and the receiver the trace-store collaborator
    /// drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProvenanceTrace>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TraceSink { tx }, rx)
    }

    /// Emit one trace. A gone consumer never fails the operation that
    /// produced the trace.
    pub fn emit(&self, trace: ProvenanceTrace) {
        debug!(
            operation = %trace.operation,
            actor = %trace.actor,
            subject = %trace.subject,
            "emitting provenance trace"
        );
        if self.tx.send(trace).is_err() {
            debug!("trace consumer gone, trace dropped");
        }
        metrics::counter!("panmesh_traces_emitted_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let (sink, mut rx) = TraceSink::channel();

        let trace = ProvenanceTrace::new(
            TraceOperation::EstablishTrust,
            BrokerId::from("did:web:a.example"),
            "rel-1".to_string(),
            json!({"partner": "did:web:b.example"}),
            json!({"status": "active"}),
        );
        sink.emit(trace.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, trace);
    }

    #[tokio::test]
    async fn test_emit_with_consumer_gone_does_not_panic() {
        let (sink, rx) = TraceSink::channel();
        drop(rx);

        sink.emit(ProvenanceTrace::new(
            TraceOperation::SyncRound,
            BrokerId::from("did:web:a.example"),
            "ctx-1".to_string(),
            json!({}),
            json!({}),
        ));
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(TraceOperation::FederateContext.to_string(), "federate-context");
        assert_eq!(TraceOperation::RevokeTrust.to_string(), "revoke-trust");
    }
}
