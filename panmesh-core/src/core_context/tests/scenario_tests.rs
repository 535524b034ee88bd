/*
    Scenario tests - Multi-broker collaboration walkthroughs

    Three brokers (a, b, c) share one context end to end: creation,
    participant adds with state transfer, interleaved mutations, and
    driven sync rounds, asserting the clock progression and final
    convergence at every step.
*/

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::core_context::model::types::BrokerId;
use crate::core_context::store::change_log::ChangeLog;
use crate::core_context::store::context_store::SharedContextStore;
use crate::core_context::sync::SyncStatus;
use crate::provenance::{ProvenanceTrace, TraceOperation, TraceSink};

const A: &str = "did:web:a.example";
const B: &str = "did:web:b.example";
const C: &str = "did:web:c.example";

fn store_for(
    dir: &std::path::Path,
    id: &str,
) -> (SharedContextStore, UnboundedReceiver<ProvenanceTrace>) {
    let (traces, rx) = TraceSink::channel();
    let file = format!("{}.log", id.rsplit(':').next().unwrap_or("log"));
    let log = ChangeLog::open(dir.join(file)).unwrap();
    (SharedContextStore::new(BrokerId::from(id), log, traces), rx)
}

fn drain(rx: &mut UnboundedReceiver<ProvenanceTrace>) -> Vec<TraceOperation> {
    let mut ops = Vec::new();
    while let Ok(trace) = rx.try_recv() {
        ops.push(trace.operation);
    }
    ops
}

#[tokio::test]
async fn three_brokers_converge_through_driven_rounds() {
    let dir = tempfile::tempdir().unwrap();
    let (store_a, mut rx_a) = store_for(dir.path(), A);
    let (store_b, _rx_b) = store_for(dir.path(), B);
    let (store_c, _rx_c) = store_for(dir.path(), C);

    // a creates the context: version 1, clock {a: 1}
    let ctx = store_a.create_context("Alpha").await.unwrap();
    let snapshot = store_a.get_snapshot(&ctx).await.unwrap();
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.vector_clock.get(A), 1);

    // a adds b and c; their clock entries seed at zero and the full
    // state transfers as a snapshot
    let for_b = store_a.add_participant(&ctx, &BrokerId::from(B)).await.unwrap();
    let for_c = store_a.add_participant(&ctx, &BrokerId::from(C)).await.unwrap();
    assert_eq!(for_c.vector_clock.get(A), 1);
    assert_eq!(for_c.vector_clock.get(B), 0);
    assert_eq!(for_c.vector_clock.get(C), 0);

    store_b.adopt_snapshot(for_b).await.unwrap();
    store_c.adopt_snapshot(for_c).await.unwrap();

    // a mutates locally, invisible to b and c until a round runs
    store_a
        .add_node(&ctx, "task", json!({"title": "outline"}))
        .await
        .unwrap();
    assert_eq!(store_b.get_snapshot(&ctx).await.unwrap().nodes.len(), 0);

    // a drives a round: a's counter and the version advance by one
    let round_a = store_a.begin_sync_round(&ctx).await.unwrap();
    assert_eq!(round_a.vector_clock.get(A), 2);
    assert_eq!(round_a.vector_clock.get(B), 0);
    store_b.apply_sync_payload(&round_a).await.unwrap();
    store_c.apply_sync_payload(&round_a).await.unwrap();
    assert_eq!(store_b.get_snapshot(&ctx).await.unwrap().nodes.len(), 1);

    // b contributes and drives its own round
    store_b
        .add_node(&ctx, "task", json!({"title": "draft"}))
        .await
        .unwrap();
    let round_b = store_b.begin_sync_round(&ctx).await.unwrap();
    assert_eq!(round_b.vector_clock.get(A), 2);
    assert_eq!(round_b.vector_clock.get(B), 1);
    store_a.apply_sync_payload(&round_b).await.unwrap();
    store_c.apply_sync_payload(&round_b).await.unwrap();

    // c contributes last
    store_c
        .add_node(&ctx, "task", json!({"title": "review"}))
        .await
        .unwrap();
    let round_c = store_c.begin_sync_round(&ctx).await.unwrap();
    assert_eq!(round_c.vector_clock.get(C), 1);
    store_a.apply_sync_payload(&round_c).await.unwrap();
    store_b.apply_sync_payload(&round_c).await.unwrap();

    // Everyone holds the same three nodes under the same clock
    let final_a = store_a.get_snapshot(&ctx).await.unwrap();
    let final_b = store_b.get_snapshot(&ctx).await.unwrap();
    let final_c = store_c.get_snapshot(&ctx).await.unwrap();
    for snapshot in [&final_a, &final_b, &final_c] {
        assert_eq!(snapshot.nodes.len(), 3);
        assert_eq!(snapshot.vector_clock.get(A), 2);
        assert_eq!(snapshot.vector_clock.get(B), 1);
        assert_eq!(snapshot.vector_clock.get(C), 1);
    }
    assert_eq!(final_a.nodes, final_b.nodes);
    assert_eq!(final_b.nodes, final_c.nodes);

    // Every mutating step on a traced exactly once, in order
    let ops = drain(&mut rx_a);
    assert_eq!(
        ops,
        vec![
            TraceOperation::CreateContext,
            TraceOperation::AddParticipant,
            TraceOperation::AddParticipant,
            TraceOperation::LocalMutation,
            TraceOperation::SyncRound,
            TraceOperation::SyncRound,
            TraceOperation::SyncRound,
        ]
    );
}

#[tokio::test]
async fn out_of_order_rounds_still_converge() {
    let dir = tempfile::tempdir().unwrap();
    let (store_a, _rx_a) = store_for(dir.path(), A);
    let (store_b, _rx_b) = store_for(dir.path(), B);
    let (store_c, _rx_c) = store_for(dir.path(), C);

    let ctx = store_a.create_context("Alpha").await.unwrap();
    let for_b = store_a.add_participant(&ctx, &BrokerId::from(B)).await.unwrap();
    let for_c = store_a.add_participant(&ctx, &BrokerId::from(C)).await.unwrap();
    store_b.adopt_snapshot(for_b).await.unwrap();
    store_c.adopt_snapshot(for_c).await.unwrap();

    // a and b mutate concurrently and each drives a round
    store_a
        .add_node(&ctx, "task", json!({"by": "a"}))
        .await
        .unwrap();
    let round_a = store_a.begin_sync_round(&ctx).await.unwrap();
    store_b
        .add_node(&ctx, "task", json!({"by": "b"}))
        .await
        .unwrap();
    let round_b = store_b.begin_sync_round(&ctx).await.unwrap();

    // c receives them in the opposite order from a's own merge
    store_c.apply_sync_payload(&round_b).await.unwrap();
    store_c.apply_sync_payload(&round_a).await.unwrap();
    store_a.apply_sync_payload(&round_b).await.unwrap();
    store_b.apply_sync_payload(&round_a).await.unwrap();

    let final_a = store_a.get_snapshot(&ctx).await.unwrap();
    let final_b = store_b.get_snapshot(&ctx).await.unwrap();
    let final_c = store_c.get_snapshot(&ctx).await.unwrap();
    assert_eq!(final_a.nodes, final_c.nodes);
    assert_eq!(final_b.nodes, final_c.nodes);
    assert_eq!(final_a.vector_clock, final_c.vector_clock);
    assert_eq!(final_c.nodes.len(), 2);
}

#[tokio::test]
async fn replica_records_track_acks_and_divergence() {
    let dir = tempfile::tempdir().unwrap();
    let (store_a, _rx_a) = store_for(dir.path(), A);

    let ctx = store_a.create_context("tracked").await.unwrap();
    store_a.add_participant(&ctx, &BrokerId::from(B)).await.unwrap();

    // State transfer leaves the fresh replica synced
    let replicas = store_a.replicas_for_context(&ctx).await;
    assert_eq!(replicas.len(), 1);
    assert_eq!(replicas[0].broker, BrokerId::from(B));
    assert_eq!(replicas[0].status, SyncStatus::Synced);

    // An ack carrying a counter ahead of the owning context marks the
    // replica diverged without failing anything
    let snapshot = store_a.get_snapshot(&ctx).await.unwrap();
    let mut runaway = snapshot.vector_clock.clone();
    runaway.increment(B);
    runaway.increment(B);
    let status = store_a
        .record_replica_ack(&ctx, &BrokerId::from(B), snapshot.version, runaway)
        .await
        .unwrap();
    assert_eq!(status, SyncStatus::Diverged);

    // A later consistent ack heals the record
    let status = store_a
        .record_replica_ack(
            &ctx,
            &BrokerId::from(B),
            snapshot.version,
            snapshot.vector_clock.clone(),
        )
        .await
        .unwrap();
    assert_eq!(status, SyncStatus::Synced);
    let replicas = store_a.replicas_for_context(&ctx).await;
    assert_eq!(replicas[0].status, SyncStatus::Synced);
}

#[tokio::test]
async fn sync_from_a_non_participant_is_rejected_without_state_change() {
    let dir = tempfile::tempdir().unwrap();
    let (store_a, _rx_a) = store_for(dir.path(), A);
    let (store_b, _rx_b) = store_for(dir.path(), B);

    // b has its own context a never joined
    let foreign = store_b.create_context("private to b").await.unwrap();
    store_b
        .add_node(&foreign, "task", json!({"title": "secret"}))
        .await
        .unwrap();
    let round = store_b.begin_sync_round(&foreign).await.unwrap();

    // a owns a same-named context but b is not a participant in it
    let ctx = store_a.create_context("private to b").await.unwrap();
    let mut forged = round.clone();
    forged.context_id = ctx.clone();
    let err = store_a.apply_sync_payload(&forged).await.unwrap_err();
    assert!(err.to_string().contains("not a participant"));

    let snapshot = store_a.get_snapshot(&ctx).await.unwrap();
    assert_eq!(snapshot.nodes.len(), 0);
    assert_eq!(snapshot.version, 1);
}
