/*
    mesh_broker.rs - Broker facade

    One MeshBroker owns the full stack for a single broker identity:
    partner registry, trust ledger, federation router, shared context
    store, and the wire adapters. It is the seam binaries drive: local
    context work, outbound shares and sync rounds, and the inbound
    dispatch for payloads arriving off the wire.

    The inbound surface is a single handle_incoming(protocol, raw)
    entry point so an HTTP listener, a DIDComm mediator callback, or
    an in-process loopback can all feed the same dispatcher.
*/

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::errors::{BrokerError, BrokerResult};
use super::types::SyncReport;
use crate::config::Config;
use crate::core_context::crdt::vector_clock::VectorClock;
use crate::core_context::model::context::ContextSnapshot;
use crate::core_context::model::types::{BrokerId, ContextId, Timestamp};
use crate::core_context::store::change_log::ChangeLog;
use crate::core_context::store::context_store::SharedContextStore;
use crate::core_context::store::errors::ContextError;
use crate::core_context::sync::{SyncPayload, SyncStatus};
use crate::core_federation::auth::{
    AcceptAllCredentials, AssertionSigner, CredentialVerifier, SignedAssertion,
};
use crate::core_federation::error::FederationError;
use crate::core_federation::registry::{BrokerRecord, BrokerRegistry};
use crate::core_federation::router::{
    EstablishTrustRequest, FederateContextRequest, FederationGrant, FederationRouter,
    RevokeTrustRequest, RouterConfig,
};
use crate::core_federation::trust_ledger::TrustLedger;
use crate::core_federation::types::{FederationProtocol, TrustLevel, TrustRelationship};
use crate::core_protocol::didcomm::federation_type;
use crate::core_protocol::{AdapterSet, HttpWireTransport, WireTransport};
use crate::metrics::Timer;
use crate::provenance::TraceSink;
use crate::storage::SqlStore;

const DATABASE_FILE: &str = "panmesh.db";
const CHANGE_LOG_FILE: &str = "changes.log";

/// A single broker on the mesh: identity, trust, contexts, and wire
pub struct MeshBroker {
    identity: BrokerId,
    config: Arc<Config>,
    registry: Arc<BrokerRegistry>,
    ledger: Arc<TrustLedger>,
    router: FederationRouter,
    store: SharedContextStore,
    verifying_key: Vec<u8>,
    credential_verifier: Arc<dyn CredentialVerifier>,
}

impl MeshBroker {
    /// Open a broker with the real HTTP transport
    pub async fn open(config: Config, traces: TraceSink) -> BrokerResult<Self> {
        Self::with_transport(config, Arc::new(HttpWireTransport::new()), traces).await
    }

    /// Open a broker over an arbitrary wire transport. Creates the
    /// data directory, opens the relational image and the change log,
    /// and rehydrates whatever state a previous run left behind.
    pub async fn with_transport(
        config: Config,
        transport: Arc<dyn WireTransport>,
        traces: TraceSink,
    ) -> BrokerResult<Self> {
        config.validate()?;
        let identity = BrokerId::new(config.broker.did.clone());

        std::fs::create_dir_all(&config.storage.data_dir)?;
        let sql = Arc::new(SqlStore::open(config.storage.data_dir.join(DATABASE_FILE))?);
        let change_log = ChangeLog::open(config.storage.data_dir.join(CHANGE_LOG_FILE))?;

        let ledger = Arc::new(TrustLedger::new().with_storage(sql.clone()));
        let relationships = ledger.hydrate().await?;

        let store = SharedContextStore::new(identity.clone(), change_log, traces.clone())
            .with_storage(sql);
        let contexts = store.hydrate().await?;

        let registry = Arc::new(BrokerRegistry::new());
        let signer = AssertionSigner::generate(identity.clone());
        let verifying_key = signer.verifying_key();

        let router = FederationRouter::new(
            identity.clone(),
            registry.clone(),
            ledger.clone(),
            AdapterSet::new(identity.clone(), transport),
            signer,
            traces,
        )
        .with_config(RouterConfig {
            max_hops: config.federation.max_hops,
            send_timeout: config.federation.send_timeout,
            http_retries: config.federation.http_retries,
        });

        info!(
            broker = %identity,
            contexts,
            relationships,
            "broker ready"
        );

        Ok(MeshBroker {
            identity,
            config: Arc::new(config),
            registry,
            ledger,
            router,
            store,
            verifying_key,
            credential_verifier: Arc::new(AcceptAllCredentials),
        })
    }

    /// Swap in the external credential machinery; the default accepts
    /// every presented credential without extracting claims.
    pub fn with_credential_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.credential_verifier = verifier;
        self
    }

    pub fn identity(&self) -> &BrokerId {
        &self.identity
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SharedContextStore {
        &self.store
    }

    pub fn router(&self) -> &FederationRouter {
        &self.router
    }

    pub fn ledger(&self) -> &Arc<TrustLedger> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<BrokerRegistry> {
        &self.registry
    }

    /// Public half of this broker's assertion key, for partners to
    /// register ahead of LimitedTrust or VerifyAlways exchanges
    pub fn verifying_key(&self) -> &[u8] {
        &self.verifying_key
    }

    /// Register or refresh a partner record. Returns true when the
    /// partner was previously unknown.
    pub async fn register_peer(&self, record: BrokerRecord) -> bool {
        self.registry.register(record).await
    }

    // ===== Trust operations =====

    pub async fn establish_trust(
        &self,
        request: EstablishTrustRequest,
    ) -> BrokerResult<TrustRelationship> {
        Ok(self.router.establish_trust(request).await?)
    }

    pub async fn revoke_trust(
        &self,
        request: RevokeTrustRequest,
    ) -> BrokerResult<TrustRelationship> {
        Ok(self.router.revoke_trust(request).await?)
    }

    pub async fn federate(&self, request: FederateContextRequest) -> BrokerResult<FederationGrant> {
        Ok(self.router.federate_context(request).await?)
    }

    /// Revoke every relationship whose expiry has passed
    pub async fn sweep_expired_trust(&self) -> BrokerResult<Vec<TrustRelationship>> {
        Ok(self.router.sweep_expired_trust().await?)
    }

    // ===== Context sharing =====

    /// Offer a context to a trusted partner: adds the partner to the
    /// participant list and federates the full-state snapshot across
    /// the wire so the partner can adopt a replica.
    ///
    /// The access gate runs first; a context is only offerable to a
    /// partner the owner has granted access to (or one already on the
    /// participant list, or anyone under Public visibility). If the
    /// wire exchange fails after the participant was recorded, the
    /// participant entry stays: re-sharing resends the snapshot and a
    /// later sync round carries the same state anyway.
    pub async fn share_context(
        &self,
        context_id: &ContextId,
        partner: &BrokerId,
    ) -> BrokerResult<FederationGrant> {
        if !self.store.may_offer(context_id, partner).await? {
            return Err(BrokerError::NotShareable {
                context: context_id.clone(),
                partner: partner.clone(),
            });
        }

        let snapshot = match self.store.add_participant(context_id, partner).await {
            Ok(snapshot) => snapshot,
            // Re-share: the participant is already on the list, send
            // the current state again
            Err(ContextError::Duplicate(_)) => self.store.get_snapshot(context_id).await?,
            Err(err) => return Err(err.into()),
        };

        let urn = format!("urn:context:{}", context_id);
        let request = FederateContextRequest::new(partner.clone(), vec![urn])
            .with_attachment(serde_json::to_value(&snapshot)?);

        debug!(context_id = %context_id, partner = %partner, "sharing context");
        self.federate(request).await
    }

    /// Drive one sync round for a context: snapshot the local state
    /// under the context lock, then fan the payload out to every
    /// remote replica. Delivery failures are counted, not fatal; the
    /// next round retries the same replicas.
    pub async fn drive_sync(&self, context_id: &ContextId) -> BrokerResult<SyncReport> {
        let timer = Timer::start("panmesh_sync_round_duration_ms");
        let payload = self.store.begin_sync_round(context_id).await?;
        let body = json!({
            "operation": "sync-context",
            "initiator": self.identity.as_str(),
            "round": serde_json::to_value(&payload)?,
        });

        let mut report = SyncReport::new(context_id.clone());
        for replica in self.store.replicas_for_context(context_id).await {
            if replica.broker == self.identity {
                continue;
            }
            report.peers += 1;

            match self
                .router
                .deliver(&replica.broker, body.clone(), federation_type("sync-context"))
                .await
            {
                Ok(response) => {
                    report.delivered += 1;
                    metrics::counter!("panmesh_sync_deliveries_total").increment(1);
                    if let Some(status) = self.record_ack(context_id, &replica.broker, &response.data).await {
                        report.statuses.push((replica.broker.clone(), status));
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        context_id = %context_id,
                        replica = %replica.broker,
                        error = %err,
                        "sync delivery failed"
                    );
                }
            }
        }

        info!(
            context_id = %context_id,
            round = payload.round,
            peers = report.peers,
            delivered = report.delivered,
            failed = report.failed,
            "sync round complete"
        );
        timer.stop();
        Ok(report)
    }

    /// Fold a sync acknowledgment into the replica tracker. Peers
    /// that reply without a version/clock body just stay at their
    /// previous record.
    async fn record_ack(
        &self,
        context_id: &ContextId,
        peer: &BrokerId,
        data: &Option<Value>,
    ) -> Option<SyncStatus> {
        let data = data.as_ref()?;
        let version = data.get("version")?.as_u64()?;
        let clock: VectorClock = serde_json::from_value(data.get("clock")?.clone()).ok()?;

        match self.store.record_replica_ack(context_id, peer, version, clock).await {
            Ok(status) => Some(status),
            Err(err) => {
                warn!(context_id = %context_id, peer = %peer, error = %err, "ack not recorded");
                None
            }
        }
    }

    // ===== Inbound dispatch =====

    /// Dispatch one payload that arrived off the wire on the named
    /// protocol. Returns the reply body for the listener to send
    /// back. Unknown operations are rejected rather than ignored.
    pub async fn handle_incoming(
        &self,
        protocol: FederationProtocol,
        raw: &Value,
    ) -> BrokerResult<Value> {
        let payload = self.router.adapters().adapter_for(protocol).parse(raw)?;
        let operation = payload
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        debug!(protocol = protocol.as_str(), operation, "inbound federation payload");
        match operation.as_str() {
            "establish-trust" => self.accept_trust(&payload).await,
            "revoke-trust" => self.accept_revocation(&payload).await,
            "federate-context" => self.accept_federation(&payload).await,
            "sync-context" => self.accept_sync(&payload).await,
            other => Err(BrokerError::UnsupportedOperation(other.to_string())),
        }
    }

    /// A partner asked to establish trust with us. Any presented
    /// credential goes through the verifier first; then the
    /// relationship is mirrored on our side. A repeat ask is
    /// acknowledged, not failed, so handshakes can be retried safely.
    async fn accept_trust(&self, payload: &Value) -> BrokerResult<Value> {
        let requester = required_broker(payload, "requester")?;

        if let Some(credential) = payload.get("credential") {
            let verdict = self.credential_verifier.verify(&requester, credential).await;
            if !verdict.valid {
                warn!(requester = %requester, "inbound trust request carried an invalid credential");
                return Ok(json!({
                    "accepted": false,
                    "broker": self.identity.as_str(),
                    "reason": "credential rejected",
                }));
            }
        }

        let level = payload
            .get("level")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<TrustLevel>().ok())
            .unwrap_or(TrustLevel::LimitedTrust);
        let protocols: Vec<FederationProtocol> = payload
            .get("protocols")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|s| s.parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        let request = EstablishTrustRequest::new(requester.clone(), level).with_protocols(protocols);
        match self.router.establish_trust(request).await {
            Ok(relationship) => Ok(json!({
                "accepted": true,
                "broker": self.identity.as_str(),
                "relationship_id": relationship.id.to_string(),
            })),
            Err(FederationError::RelationshipExists(_)) => Ok(json!({
                "accepted": true,
                "broker": self.identity.as_str(),
                "note": "already-established",
            })),
            Err(err) => Err(err.into()),
        }
    }

    /// A partner revoked us. Mirror the revocation locally; unknown
    /// or already-revoked relationships still acknowledge, since the
    /// notification is advisory.
    async fn accept_revocation(&self, payload: &Value) -> BrokerResult<Value> {
        let revoker = required_broker(payload, "revoker")?;
        let reason = payload
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("unspecified");

        let request = RevokeTrustRequest::new(revoker.clone(), format!("partner revoked: {}", reason))
            .revoking_bridges();
        match self.router.revoke_trust(request).await {
            Ok(_)
            | Err(FederationError::AlreadyRevoked(_))
            | Err(FederationError::RelationshipNotFound(_)) => Ok(json!({
                "accepted": true,
                "broker": self.identity.as_str(),
            })),
            Err(err) => Err(err.into()),
        }
    }

    /// A partner federated resources to us, possibly with a context
    /// snapshot attached for adoption.
    async fn accept_federation(&self, payload: &Value) -> BrokerResult<Value> {
        let source = required_broker(payload, "source")?;
        self.verify_inbound_auth(&source, payload).await?;

        let resources: Vec<String> = payload
            .get("resources")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut adopted = Vec::new();
        if let Some(attachment) = payload.get("attachment") {
            let snapshot: ContextSnapshot = serde_json::from_value(attachment.clone())?;
            let context_id = snapshot.context_id.clone();
            self.store.adopt_snapshot(snapshot).await?;
            metrics::counter!("panmesh_contexts_adopted_total").increment(1);
            info!(context_id = %context_id, source = %source, "adopted federated context");
            adopted.push(context_id.to_string());
        }

        Ok(json!({
            "accepted": true,
            "broker": self.identity.as_str(),
            "resources": resources,
            "adopted": adopted,
        }))
    }

    /// A sync round arrived for a context we replicate. Merge it and
    /// report our post-merge version and clock so the initiator can
    /// update its replica record for us.
    async fn accept_sync(&self, payload: &Value) -> BrokerResult<Value> {
        let initiator = required_broker(payload, "initiator")?;
        self.verify_inbound_auth(&initiator, payload).await?;

        let round: SyncPayload = payload
            .get("round")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| BrokerError::Serialization("sync payload missing round".to_string()))?;
        if round.initiator != initiator {
            return Err(BrokerError::Auth(format!(
                "sync round initiator {} does not match sender {}",
                round.initiator, initiator
            )));
        }

        let applied = self.store.apply_sync_payload(&round).await?;
        let snapshot = self.store.get_snapshot(&round.context_id).await?;

        Ok(json!({
            "accepted": true,
            "broker": self.identity.as_str(),
            "context_id": round.context_id.to_string(),
            "applied": applied.len(),
            "version": snapshot.version,
            "clock": serde_json::to_value(&snapshot.vector_clock)?,
        }))
    }

    /// Inbound auth policy. FullTrust partners are exempt; everyone
    /// else must attach an unexpired assertion issued by the sender
    /// and addressed to us. When the sender's verifying key is on
    /// record the signature must check out; without a key on record,
    /// VerifyAlways partners are rejected and LimitedTrust partners
    /// pass on the claims alone.
    async fn verify_inbound_auth(&self, source: &BrokerId, payload: &Value) -> BrokerResult<()> {
        let relationship = self.router.require_active(source).await?;
        if !AssertionSigner::required_for(relationship.level) {
            return Ok(());
        }

        let assertion: SignedAssertion = payload
            .get("assertion")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| {
                BrokerError::Auth(format!("{} must attach an assertion", source))
            })?;

        if assertion.is_expired(Timestamp::now()) {
            return Err(BrokerError::Auth(format!("assertion from {} expired", source)));
        }
        if assertion.claims.iss != source.as_str() || assertion.claims.aud != self.identity.as_str() {
            return Err(BrokerError::Auth(format!(
                "assertion addressing mismatch: iss={} aud={}",
                assertion.claims.iss, assertion.claims.aud
            )));
        }

        match self.registry.verifying_key_for(source).await {
            Some(key) => {
                if !assertion.verify(&key) {
                    return Err(BrokerError::Auth(format!(
                        "assertion signature from {} failed verification",
                        source
                    )));
                }
                Ok(())
            }
            None if relationship.level == TrustLevel::VerifyAlways => Err(BrokerError::Auth(
                format!("no verifying key on record for {}", source),
            )),
            None => Ok(()),
        }
    }

    // ===== Background maintenance =====

    /// Spawn the periodic expiry sweep. Aborting the handle stops it.
    pub fn spawn_trust_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let broker = Arc::clone(self);
        let period = broker.config.federation.trust_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match broker.sweep_expired_trust().await {
                    Ok(swept) if !swept.is_empty() => {
                        info!(count = swept.len(), "swept expired trust relationships");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "trust sweep failed"),
                }
            }
        })
    }

    /// Spawn the periodic sync driver over every known context.
    /// Aborting the handle stops it.
    pub fn spawn_sync_driver(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let broker = Arc::clone(self);
        let period = broker.config.federation.sync_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                for context_id in broker.store.list_contexts().await {
                    if let Err(err) = broker.drive_sync(&context_id).await {
                        warn!(context_id = %context_id, error = %err, "periodic sync failed");
                    }
                }
            }
        })
    }
}

/// Config helper for callers that keep per-broker state under one root
pub fn config_for(did: &str, data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.broker.did = did.to_string();
    config.storage.data_dir = data_dir.to_path_buf();
    config
}

fn required_broker(payload: &Value, key: &str) -> BrokerResult<BrokerId> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(BrokerId::from)
        .ok_or_else(|| BrokerError::Serialization(format!("payload missing {}", key)))
}
