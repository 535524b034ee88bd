/*
    metrics - Metric registration and helpers

    Counter and histogram emission goes through the `metrics` facade at
    the call sites; this module registers descriptions for everything
    the crate emits and provides a small duration timer. Installing an
    exporter (Prometheus or otherwise) is left to the embedding binary.
*/

use metrics::{describe_counter, describe_histogram, histogram};
use std::time::Instant;

/// Register descriptions for every metric the crate emits
pub fn init_metrics() {
    // Trust ledger
    describe_counter!(
        "panmesh_trust_established_total",
        "Trust relationships established"
    );
    describe_counter!(
        "panmesh_trust_revoked_total",
        "Trust relationships explicitly revoked"
    );
    describe_counter!(
        "panmesh_trust_expired_total",
        "Trust relationships revoked by the expiry sweep"
    );

    // Federation router
    describe_counter!(
        "panmesh_federations_total",
        "Successful federate-context exchanges"
    );
    describe_counter!(
        "panmesh_federation_failures_total",
        "Federate-context exchanges that failed on the wire"
    );

    // Context sync
    describe_counter!("panmesh_sync_rounds_total", "Sync rounds initiated locally");
    describe_counter!(
        "panmesh_sync_applies_total",
        "Inbound sync payloads merged into local state"
    );
    describe_counter!(
        "panmesh_sync_deliveries_total",
        "Sync payloads delivered to remote replicas"
    );
    describe_counter!(
        "panmesh_replica_divergence_total",
        "Replica acknowledgements that reported divergent state"
    );
    describe_counter!(
        "panmesh_contexts_adopted_total",
        "Context snapshots adopted from remote brokers"
    );
    describe_histogram!(
        "panmesh_sync_round_duration_ms",
        "Wall-clock duration of a driven sync round in milliseconds"
    );

    // Provenance
    describe_counter!(
        "panmesh_traces_emitted_total",
        "Provenance traces emitted for successful operations"
    );
}

/// Measures one operation and records it as a histogram sample on stop
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn stop(self) {
        let elapsed = self.start.elapsed();
        histogram!(self.name).record(elapsed.as_secs_f64() * 1000.0);
    }
}
