//! In-process federation walkthrough
//!
//! Boots three brokers over a loopback wire, negotiates mutual
//! LimitedTrust between every pair, shares one context from the first
//! broker to the other two, and drives interleaved sync rounds until
//! every replica converges. Finishes by revoking one partner to show
//! deliveries failing at the trust gate.
//!
//! Broker state lands under --data-dir (cleared on start) so the
//! SQLite image and change logs can be inspected after a run.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::RwLock;

use panmesh_core::broker::{config_for, MeshBroker, SyncReport};
use panmesh_core::core_context::model::types::{AccessLevel, BrokerId, ContextId};
use panmesh_core::core_federation::{
    BrokerRecord, EstablishTrustRequest, FederationProtocol, RevokeTrustRequest, TrustLevel,
};
use panmesh_core::core_protocol::{WireError, WireReply, WireTransport};
use panmesh_core::logging::{init_logging_with_config, LogConfig};
use panmesh_core::{LogLevel, ProvenanceTrace, TraceSink};

const ALFA: &str = "did:panmesh:alfa";
const BRAVO: &str = "did:panmesh:bravo";
const CHARLIE: &str = "did:panmesh:charlie";

#[derive(Parser, Debug)]
#[command(name = "test-harness")]
#[command(about = "Drives three in-process PanMesh brokers through a federation scenario", long_about = None)]
struct Args {
    /// Scratch directory for broker state; cleared on start
    #[arg(long, default_value = "./demo-data")]
    data_dir: PathBuf,

    /// Log level for broker internals (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Expose Prometheus metrics at this address (e.g. 127.0.0.1:9184);
    /// the process stays up after the scenario so counters can be
    /// scraped
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
}

/// In-process wire. Every endpoint URL maps to one broker; posting to
/// it runs that broker's inbound dispatch and wraps the reply, so the
/// full adapter/auth/merge path is exercised without sockets.
struct LoopbackNet {
    routes: RwLock<HashMap<String, Arc<MeshBroker>>>,
}

impl LoopbackNet {
    fn new() -> Arc<Self> {
        Arc::new(LoopbackNet {
            routes: RwLock::new(HashMap::new()),
        })
    }

    async fn attach(&self, endpoint: impl Into<String>, broker: Arc<MeshBroker>) {
        self.routes.write().await.insert(endpoint.into(), broker);
    }
}

#[async_trait]
impl WireTransport for LoopbackNet {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        _headers: &[(String, String)],
        _timeout: Duration,
    ) -> Result<WireReply, WireError> {
        let target = self.routes.read().await.get(url).cloned();
        let Some(target) = target else {
            return Err(WireError::Connect(format!("no broker listening at {}", url)));
        };

        match target.handle_incoming(FederationProtocol::Http, body).await {
            Ok(reply) => Ok(WireReply {
                status: 200,
                body: Some(reply),
                headers: HashMap::new(),
            }),
            Err(err) => Ok(WireReply {
                status: 400,
                body: Some(json!({ "error": err.to_string() })),
                headers: HashMap::new(),
            }),
        }
    }
}

fn short_name(did: &str) -> &str {
    did.rsplit(':').next().unwrap_or(did)
}

fn endpoint(did: &str) -> String {
    format!("http://{}.panmesh.local/federation", short_name(did))
}

async fn boot(
    net: &Arc<LoopbackNet>,
    data_dir: &Path,
    did: &str,
) -> Result<(Arc<MeshBroker>, UnboundedReceiver<ProvenanceTrace>)> {
    let (traces, rx) = TraceSink::channel();
    let broker = MeshBroker::with_transport(
        config_for(did, &data_dir.join(short_name(did))),
        net.clone() as Arc<dyn WireTransport>,
        traces,
    )
    .await
    .with_context(|| format!("booting {}", did))?;

    let broker = Arc::new(broker);
    net.attach(endpoint(did), broker.clone()).await;
    Ok((broker, rx))
}

/// Register two brokers with each other: HTTP endpoint plus verifying
/// key, so LimitedTrust assertions verify in both directions
async fn introduce(left: &Arc<MeshBroker>, right: &Arc<MeshBroker>) {
    left.register_peer(
        BrokerRecord::new(right.identity().clone())
            .with_display_name(short_name(right.identity().as_str()))
            .with_endpoint(FederationProtocol::Http, endpoint(right.identity().as_str()))
            .with_verifying_key(right.verifying_key().to_vec()),
    )
    .await;
    right
        .register_peer(
            BrokerRecord::new(left.identity().clone())
                .with_display_name(short_name(left.identity().as_str()))
                .with_endpoint(FederationProtocol::Http, endpoint(left.identity().as_str()))
                .with_verifying_key(left.verifying_key().to_vec()),
        )
        .await;
}

fn print_report(label: &str, report: &SyncReport) {
    println!(
        "  {} round: {} peers, {} delivered, {} failed",
        label, report.peers, report.delivered, report.failed
    );
    for (peer, status) in &report.statuses {
        println!("    ack from {}: {:?}", short_name(peer.as_str()), status);
    }
}

async fn print_views(
    brokers: &[&Arc<MeshBroker>],
    context_id: &ContextId,
) -> Result<()> {
    for broker in brokers {
        let snapshot = broker.store().get_snapshot(context_id).await?;
        let clock: Vec<String> = snapshot
            .participants
            .iter()
            .map(|p| format!("{}:{}", short_name(p.as_str()), snapshot.vector_clock.get(p.as_str())))
            .collect();
        println!(
            "  {:<8} v{} nodes={} edges={} clock={{{}}}",
            short_name(broker.identity().as_str()),
            snapshot.version,
            snapshot.nodes.len(),
            snapshot.edges.len(),
            clock.join(", ")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = LogLevel::parse(&args.log_level)
        .with_context(|| format!("unknown log level '{}'", args.log_level))?;
    init_logging_with_config(LogConfig::new(level))?;

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing the Prometheus exporter")?;
        panmesh_core::metrics::init_metrics();
        println!("metrics at http://{}/metrics", addr);
    }

    if args.data_dir.exists() {
        std::fs::remove_dir_all(&args.data_dir).context("clearing scratch directory")?;
    }

    let net = LoopbackNet::new();
    let (alfa, mut alfa_traces) = boot(&net, &args.data_dir, ALFA).await?;
    let (bravo, _bravo_traces) = boot(&net, &args.data_dir, BRAVO).await?;
    let (charlie, _charlie_traces) = boot(&net, &args.data_dir, CHARLIE).await?;

    println!("== brokers online ==");
    for broker in [&alfa, &bravo, &charlie] {
        println!("  {} at {}", broker.identity(), endpoint(broker.identity().as_str()));
    }

    // Every pair exchanges endpoints and keys, then alfa and bravo
    // initiate mutual trust; the partner side mirrors over the wire
    introduce(&alfa, &bravo).await;
    introduce(&alfa, &charlie).await;
    introduce(&bravo, &charlie).await;

    println!("\n== establishing mutual trust (LimitedTrust) ==");
    for partner in [BRAVO, CHARLIE] {
        let relationship = alfa
            .establish_trust(
                EstablishTrustRequest::new(BrokerId::from(partner), TrustLevel::LimitedTrust)
                    .mutual(),
            )
            .await?;
        println!("  alfa <-> {}: {}", short_name(partner), relationship.id);
    }
    let relationship = bravo
        .establish_trust(
            EstablishTrustRequest::new(BrokerId::from(CHARLIE), TrustLevel::LimitedTrust).mutual(),
        )
        .await?;
    println!("  bravo <-> charlie: {}", relationship.id);

    // alfa builds the context and shares the snapshot with both
    // partners; they adopt replicas through the loopback wire
    println!("\n== sharing a context from alfa ==");
    let ctx = alfa.store().create_context("launch checklist").await?;
    let outline = alfa
        .store()
        .add_node(&ctx, "task", json!({ "title": "draft the outline" }))
        .await?;
    for partner in [BRAVO, CHARLIE] {
        alfa.store()
            .grant_access(&ctx, &BrokerId::from(partner), AccessLevel::Contribute, None)
            .await?;
        let grant = alfa.share_context(&ctx, &BrokerId::from(partner)).await?;
        println!(
            "  shared {} with {} ({} affordance)",
            ctx,
            short_name(partner),
            grant.affordances.len()
        );
    }
    // bravo adopted its replica before charlie joined; re-offering
    // resends the current snapshot so bravo's roster includes charlie
    // and later rounds initiated by charlie are accepted
    alfa.share_context(&ctx, &BrokerId::from(BRAVO)).await?;
    println!("  re-shared {} with bravo to refresh its roster", ctx);
    print_views(&[&alfa, &bravo, &charlie], &ctx).await?;

    // bravo and charlie contribute from their replicas and each drives
    // a round; acks carry the peers' post-merge state back
    println!("\n== interleaved edits and sync rounds ==");
    let draft = bravo
        .store()
        .add_node(&ctx, "task", json!({ "title": "write the draft" }))
        .await?;
    print_report("bravo", &bravo.drive_sync(&ctx).await?);

    let review = charlie
        .store()
        .add_node(&ctx, "task", json!({ "title": "review the draft" }))
        .await?;
    charlie
        .store()
        .add_edge(&ctx, &review, &draft, "follows", None)
        .await?;
    charlie
        .store()
        .add_edge(&ctx, &draft, &outline, "follows", None)
        .await?;
    print_report("charlie", &charlie.drive_sync(&ctx).await?);

    // One reconciling round from the owner settles every replica
    print_report("alfa", &alfa.drive_sync(&ctx).await?);
    print_views(&[&alfa, &bravo, &charlie], &ctx).await?;

    let reference = alfa.store().get_snapshot(&ctx).await?;
    for broker in [&bravo, &charlie] {
        let snapshot = broker.store().get_snapshot(&ctx).await?;
        if snapshot.nodes != reference.nodes
            || snapshot.edges != reference.edges
            || snapshot.vector_clock != reference.vector_clock
        {
            bail!("replica on {} diverged from alfa", broker.identity());
        }
    }
    println!("  all three replicas converged");

    // Revocation closes the trust gate: the next round still reaches
    // bravo but counts charlie as failed
    println!("\n== revoking charlie ==");
    alfa.revoke_trust(
        RevokeTrustRequest::new(BrokerId::from(CHARLIE), "scenario teardown")
            .notifying_partner(),
    )
    .await?;
    alfa.store()
        .update_node(&ctx, &outline, json!({ "title": "draft the outline", "done": true }))
        .await?;
    print_report("alfa", &alfa.drive_sync(&ctx).await?);

    println!("\n== provenance traces recorded on alfa ==");
    let mut counts: Vec<(String, usize)> = Vec::new();
    while let Ok(trace) = alfa_traces.try_recv() {
        let name = trace.operation.to_string();
        match counts.iter_mut().find(|(op, _)| *op == name) {
            Some((_, count)) => *count += 1,
            None => counts.push((name, 1)),
        }
    }
    for (operation, count) in &counts {
        println!("  {:<18} x{}", operation, count);
    }

    println!("\nscenario complete; state under {}", args.data_dir.display());

    if let Some(addr) = args.metrics_addr {
        println!("holding for scrapes at http://{}/metrics; ctrl-c to exit", addr);
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
