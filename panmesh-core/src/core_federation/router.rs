/*
    router.rs - Federation router

    Orchestrates the three federation operations against the trust
    ledger, broker registry, and protocol adapters:

    - establish_trust: create an active relationship, optionally firing
      a connect message at the partner (the partner's own inbound
      establish completes the handshake; the outbound send is not
      tracked synchronously)
    - revoke_trust: terminal transition, optional partner notification
    - federate_context: policy checks (active relationship, protocol
      set, credential bridge, hop budget), then one adapter exchange;
      only after the wire succeeds does the hop enter the audit trail
      and the affordances materialize

    Policy failures are synchronous and leave no partial path behind.
    Transport failures come back as structured errors, never panics.
    Every operation that succeeds emits exactly one provenance trace;
    failed operations emit none.
*/

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core_context::model::types::{AccessLevel, BrokerId, Timestamp};
use crate::core_federation::auth::AssertionSigner;
use crate::core_federation::error::{FederationError, FederationResult};
use crate::core_federation::registry::BrokerRegistry;
use crate::core_federation::trust_ledger::TrustLedger;
use crate::core_federation::types::{
    BridgeId, CredentialBridge, FederatedAffordance, FederationHop, FederationProtocol,
    RelationshipId, RelationshipStatus, TrustLevel, TrustRelationship,
};
use crate::core_protocol::didcomm::{connect_type, federation_type};
use crate::core_protocol::{AdapterResponse, AdapterSet, SendOptions};
use crate::provenance::{ProvenanceTrace, TraceOperation, TraceSink};

/// Hop budget applied when neither the caller nor the config narrows it
pub const DEFAULT_MAX_HOPS: u32 = 5;

/// Ceiling no configuration can raise; guarantees termination under
/// cyclic trust graphs
pub const HARD_MAX_HOPS: u32 = 10;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Instance-wide hop budget, clamped to HARD_MAX_HOPS
    pub max_hops: u32,
    /// Wire budget per adapter attempt
    pub send_timeout: Duration,
    /// Transport-failure retry budget for the HTTP adapter
    pub http_retries: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            max_hops: DEFAULT_MAX_HOPS,
            send_timeout: Duration::from_secs(30),
            http_retries: 3,
        }
    }
}

/// Inputs for establish_trust
#[derive(Debug, Clone)]
pub struct EstablishTrustRequest {
    pub partner: BrokerId,
    pub level: TrustLevel,
    pub trust_domain: Option<String>,
    /// (from_domain, to_domain) pairs; defaults to self<->partner
    pub bridges: Vec<(String, String)>,
    /// Wire protocols the relationship permits; defaults to HTTP
    pub protocols: Vec<FederationProtocol>,
    pub expires_at: Option<Timestamp>,
    /// Fire a connect message so the partner can establish back
    pub mutual: bool,
}

impl EstablishTrustRequest {
    pub fn new(partner: BrokerId, level: TrustLevel) -> Self {
        EstablishTrustRequest {
            partner,
            level,
            trust_domain: None,
            bridges: Vec::new(),
            protocols: Vec::new(),
            expires_at: None,
            mutual: false,
        }
    }

    pub fn with_protocols(mut self, protocols: Vec<FederationProtocol>) -> Self {
        self.protocols = protocols;
        self
    }

    pub fn with_trust_domain(mut self, domain: impl Into<String>) -> Self {
        self.trust_domain = Some(domain.into());
        self
    }

    pub fn with_bridge(mut self, from_domain: impl Into<String>, to_domain: impl Into<String>) -> Self {
        self.bridges.push((from_domain.into(), to_domain.into()));
        self
    }

    pub fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn mutual(mut self) -> Self {
        self.mutual = true;
        self
    }
}

/// Inputs for revoke_trust
#[derive(Debug, Clone)]
pub struct RevokeTrustRequest {
    pub partner: BrokerId,
    pub reason: String,
    pub revoke_bridges: bool,
    pub notify_partner: bool,
}

impl RevokeTrustRequest {
    pub fn new(partner: BrokerId, reason: impl Into<String>) -> Self {
        RevokeTrustRequest {
            partner,
            reason: reason.into(),
            revoke_bridges: false,
            notify_partner: false,
        }
    }

    pub fn revoking_bridges(mut self) -> Self {
        self.revoke_bridges = true;
        self
    }

    pub fn notifying_partner(mut self) -> Self {
        self.notify_partner = true;
        self
    }
}

/// Inputs for federate_context. current_hop and path carry the
/// store-and-forward accumulator across relays.
#[derive(Debug, Clone)]
pub struct FederateContextRequest {
    pub target: BrokerId,
    pub resource_urns: Vec<String>,
    /// Requested wire protocol; defaults to the relationship's first
    pub protocol: Option<FederationProtocol>,
    /// Credential bridge the exchange must ride on, if any
    pub bridge_id: Option<BridgeId>,
    /// Caller's hop budget; min'd with the instance and hard limits
    pub max_hops: Option<u32>,
    pub current_hop: u32,
    pub path: Vec<FederationHop>,
    /// Opaque payload shipped alongside the request (a context
    /// snapshot, typically)
    pub attachment: Option<Value>,
}

impl FederateContextRequest {
    pub fn new(target: BrokerId, resource_urns: Vec<String>) -> Self {
        FederateContextRequest {
            target,
            resource_urns,
            protocol: None,
            bridge_id: None,
            max_hops: None,
            current_hop: 0,
            path: Vec::new(),
            attachment: None,
        }
    }

    pub fn over(mut self, protocol: FederationProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn via_bridge(mut self, bridge_id: BridgeId) -> Self {
        self.bridge_id = Some(bridge_id);
        self
    }

    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = Some(max_hops);
        self
    }

    /// Continue a relayed request: the accumulated path and hop count
    /// travel with it
    pub fn relayed(mut self, current_hop: u32, path: Vec<FederationHop>) -> Self {
        self.current_hop = current_hop;
        self.path = path;
        self
    }

    pub fn with_attachment(mut self, attachment: Value) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Result of a successful federate_context call
#[derive(Debug, Clone)]
pub struct FederationGrant {
    pub relationship_id: RelationshipId,
    pub target: BrokerId,
    pub protocol: FederationProtocol,
    /// Path including the hop this call appended
    pub path: Vec<FederationHop>,
    pub hop_count: u32,
    pub affordances: Vec<FederatedAffordance>,
    /// Whatever the partner answered with
    pub data: Option<Value>,
}

/// Federation orchestrator for one broker instance
pub struct FederationRouter {
    local_broker: BrokerId,
    registry: Arc<BrokerRegistry>,
    ledger: Arc<TrustLedger>,
    adapters: AdapterSet,
    signer: AssertionSigner,
    traces: TraceSink,
    config: RouterConfig,
}

impl FederationRouter {
    pub fn new(
        local_broker: BrokerId,
        registry: Arc<BrokerRegistry>,
        ledger: Arc<TrustLedger>,
        adapters: AdapterSet,
        signer: AssertionSigner,
        traces: TraceSink,
    ) -> Self {
        FederationRouter {
            local_broker,
            registry,
            ledger,
            adapters,
            signer,
            traces,
            config: RouterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local_broker(&self) -> &BrokerId {
        &self.local_broker
    }

    pub fn ledger(&self) -> &Arc<TrustLedger> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<BrokerRegistry> {
        &self.registry
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    /// The active relationship with a partner, distinguishing "never
    /// trusted" from "trusted once, not now"
    pub async fn require_active(&self, partner: &BrokerId) -> FederationResult<TrustRelationship> {
        if let Some(relationship) = self.ledger.active(partner).await {
            return Ok(relationship);
        }
        if self.ledger.history(partner).await.is_empty() {
            Err(FederationError::RelationshipNotFound(partner.clone()))
        } else {
            Err(FederationError::RelationshipInactive(partner.clone()))
        }
    }

    /// Establish an active trust relationship with a partner
    pub async fn establish_trust(
        &self,
        request: EstablishTrustRequest,
    ) -> FederationResult<TrustRelationship> {
        if request.partner == self.local_broker {
            return Err(FederationError::Validation(
                "cannot establish trust with self".to_string(),
            ));
        }

        let protocols = if request.protocols.is_empty() {
            vec![FederationProtocol::Http]
        } else {
            request.protocols.clone()
        };

        let bridges: Vec<CredentialBridge> = if request.bridges.is_empty() {
            vec![CredentialBridge::new(
                self.local_broker.to_string(),
                request.partner.to_string(),
            )]
        } else {
            request
                .bridges
                .iter()
                .map(|(from, to)| CredentialBridge::new(from.clone(), to.clone()))
                .collect()
        };

        let relationship = TrustRelationship {
            id: RelationshipId::generate(),
            partner: request.partner.clone(),
            level: request.level,
            trust_domain: request.trust_domain.clone(),
            protocols,
            bridges,
            hops: Vec::new(),
            status: RelationshipStatus::Active,
            established_at: Timestamp::now(),
            expires_at: request.expires_at,
            revoked_at: None,
            revocation_reason: None,
        };

        let relationship = self.ledger.establish(relationship).await?;

        if request.mutual {
            // Best effort; the partner's inbound establish completes
            // the handshake
            let payload = json!({
                "operation": "establish-trust",
                "requester": self.local_broker.as_str(),
                "level": relationship.level.as_str(),
                "protocols": relationship.protocols.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
                "mutual": false,
            });
            self.notify_partner(&relationship, connect_type("connect"), payload)
                .await;
        }

        self.traces.emit(ProvenanceTrace::new(
            TraceOperation::EstablishTrust,
            self.local_broker.clone(),
            relationship.partner.to_string(),
            json!({
                "level": relationship.level.as_str(),
                "protocols": relationship.protocols.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
                "mutual": request.mutual,
            }),
            json!({
                "relationship_id": relationship.id.to_string(),
                "bridges": relationship.bridges.len(),
            }),
        ));

        Ok(relationship)
    }

    /// Revoke the partner's relationship; terminal
    pub async fn revoke_trust(
        &self,
        request: RevokeTrustRequest,
    ) -> FederationResult<TrustRelationship> {
        let revoked = self
            .ledger
            .revoke(&request.partner, &request.reason, request.revoke_bridges)
            .await?;

        if request.notify_partner {
            let payload = json!({
                "operation": "revoke-trust",
                "revoker": self.local_broker.as_str(),
                "reason": request.reason,
            });
            self.notify_partner(&revoked, federation_type("revoke-trust"), payload)
                .await;
        }

        self.traces.emit(ProvenanceTrace::new(
            TraceOperation::RevokeTrust,
            self.local_broker.clone(),
            revoked.partner.to_string(),
            json!({
                "reason": request.reason,
                "bridges_revoked": request.revoke_bridges,
                "partner_notified": request.notify_partner,
            }),
            json!({ "relationship_id": revoked.id.to_string() }),
        ));

        Ok(revoked)
    }

    /// Share resources with a trusted partner over one federation hop
    pub async fn federate_context(
        &self,
        mut request: FederateContextRequest,
    ) -> FederationResult<FederationGrant> {
        let limit = self.effective_hop_limit(request.max_hops);
        if request.current_hop >= limit {
            return Err(FederationError::HopLimitExceeded {
                current: request.current_hop,
                limit,
            });
        }
        if request.resource_urns.is_empty() {
            return Err(FederationError::Validation(
                "federate_context requires at least one resource URN".to_string(),
            ));
        }

        let relationship = self.require_active(&request.target).await?;

        let protocol = match request.protocol {
            Some(protocol) => protocol,
            None => relationship.protocols.first().copied().ok_or_else(|| {
                FederationError::Validation(format!(
                    "relationship with {} permits no protocols",
                    request.target
                ))
            })?,
        };
        if !relationship.supports_protocol(protocol) {
            return Err(FederationError::ProtocolNotSupported {
                partner: request.target,
                protocol,
            });
        }

        if let Some(bridge_id) = &request.bridge_id {
            if !relationship.has_bridge(bridge_id) {
                return Err(FederationError::BridgeNotFound(bridge_id.clone()));
            }
        }

        let endpoint = self.registry.endpoint_for(&request.target, protocol).await?;

        let hop_number = request.current_hop + 1;
        let mut payload = json!({
            "operation": "federate-context",
            "source": self.local_broker.as_str(),
            "target": request.target.as_str(),
            "resources": request.resource_urns.clone(),
            "hop": hop_number,
            "path": request.path.iter().map(|h| h.broker.as_str()).collect::<Vec<_>>(),
        });
        if let Some(attachment) = request.attachment.take() {
            if let Value::Object(map) = &mut payload {
                map.insert("attachment".to_string(), attachment);
            }
        }

        let mut options = SendOptions::default()
            .with_timeout(self.config.send_timeout)
            .with_retries(self.config.http_retries)
            .with_recipient(request.target.as_str())
            .with_message_type(federation_type("federate-context"))
            .with_header("X-Trust-Level", relationship.level.as_str());

        if AssertionSigner::required_for(relationship.level) {
            let assertion = self.signer.assert_for(&request.target)?;
            if let Value::Object(map) = &mut payload {
                map.insert("assertion".to_string(), serde_json::to_value(&assertion)?);
            }
            options = options.with_header("Authorization", format!("Assertion {}", assertion.claims.jti));
        }

        debug!(
            target = %request.target,
            protocol = protocol.as_str(),
            hop = hop_number,
            limit,
            "dispatching federation exchange"
        );

        // The hop-limit check and path append are atomic with respect
        // to this request; the wire call itself happens without any
        // ledger lock held
        let response = self
            .adapters
            .adapter_for(protocol)
            .send(&endpoint, &payload, &options)
            .await;
        if !response.success {
            metrics::counter!("panmesh_federation_failures_total").increment(1);
            let detail = response
                .error
                .unwrap_or_else(|| "federation exchange failed".to_string());
            return Err(FederationError::Transport(detail));
        }

        let hop = FederationHop {
            broker: request.target.clone(),
            hop_number,
            protocol,
            occurred_at: Timestamp::now(),
        };
        let relationship = self.ledger.record_hop(&request.target, hop.clone()).await?;

        let mut path = request.path.clone();
        path.push(hop);

        let requires_auth = relationship.level != TrustLevel::FullTrust;
        let affordances: Vec<FederatedAffordance> = request
            .resource_urns
            .iter()
            .map(|urn| FederatedAffordance {
                resource_urn: urn.clone(),
                action: AccessLevel::Observe,
                provider: self.local_broker.clone(),
                relationship_id: relationship.id.clone(),
                requires_crossdomain_auth: requires_auth,
            })
            .collect();

        info!(
            target = %request.target,
            protocol = protocol.as_str(),
            hops = path.len(),
            affordances = affordances.len(),
            "federated context"
        );
        metrics::counter!("panmesh_federations_total").increment(1);
        self.traces.emit(ProvenanceTrace::new(
            TraceOperation::FederateContext,
            self.local_broker.clone(),
            request.target.to_string(),
            json!({
                "relationship_id": relationship.id.to_string(),
                "target": request.target.as_str(),
                "resources": request.resource_urns,
            }),
            json!({
                "path": path.iter().map(|h| h.broker.as_str()).collect::<Vec<_>>(),
                "hop_count": path.len(),
                "affordances": affordances.len(),
            }),
        ));

        Ok(FederationGrant {
            relationship_id: relationship.id.clone(),
            target: request.target,
            protocol,
            path,
            hop_count: hop_number,
            affordances,
            data: response.data,
        })
    }

    /// Authenticated point-to-point delivery to a trusted partner,
    /// outside the federate-context flow. Sync rounds ride on this.
    /// Carries the same assertion discipline as federate_context but
    /// records no hop and emits no trace of its own.
    pub async fn deliver(
        &self,
        partner: &BrokerId,
        mut payload: Value,
        message_type: String,
    ) -> FederationResult<AdapterResponse> {
        let relationship = self.require_active(partner).await?;
        let protocol = relationship.protocols.first().copied().ok_or_else(|| {
            FederationError::Validation(format!(
                "relationship with {} permits no protocols",
                partner
            ))
        })?;
        let endpoint = self.registry.endpoint_for(partner, protocol).await?;

        let mut options = SendOptions::default()
            .with_timeout(self.config.send_timeout)
            .with_retries(self.config.http_retries)
            .with_recipient(partner.as_str())
            .with_message_type(message_type)
            .with_header("X-Trust-Level", relationship.level.as_str());

        if AssertionSigner::required_for(relationship.level) {
            let assertion = self.signer.assert_for(partner)?;
            if let Value::Object(map) = &mut payload {
                map.insert("assertion".to_string(), serde_json::to_value(&assertion)?);
            }
            options =
                options.with_header("Authorization", format!("Assertion {}", assertion.claims.jti));
        }

        let response = self
            .adapters
            .adapter_for(protocol)
            .send(&endpoint, &payload, &options)
            .await;
        if !response.success {
            return Err(FederationError::Transport(
                response
                    .error
                    .unwrap_or_else(|| "delivery failed".to_string()),
            ));
        }
        Ok(response)
    }

    /// Run the expiry sweep, tracing each relationship it transitions
    pub async fn sweep_expired_trust(&self) -> FederationResult<Vec<TrustRelationship>> {
        let swept = self.ledger.sweep_expired().await?;
        for relationship in &swept {
            self.traces.emit(ProvenanceTrace::new(
                TraceOperation::RevokeTrust,
                self.local_broker.clone(),
                relationship.partner.to_string(),
                json!({ "reason": "expired", "sweep": true }),
                json!({ "relationship_id": relationship.id.to_string() }),
            ));
        }
        Ok(swept)
    }

    fn effective_hop_limit(&self, requested: Option<u32>) -> u32 {
        let instance_limit = self.config.max_hops.min(HARD_MAX_HOPS);
        match requested {
            Some(limit) => limit.min(instance_limit),
            None => instance_limit,
        }
    }

    /// Best-effort outbound notification; failures are logged and
    /// swallowed
    async fn notify_partner(&self, relationship: &TrustRelationship, message_type: String, payload: Value) {
        let mut endpoint = None;
        for protocol in &relationship.protocols {
            if let Ok(found) = self.registry.endpoint_for(&relationship.partner, *protocol).await {
                endpoint = Some((*protocol, found));
                break;
            }
        }
        let Some((protocol, endpoint)) = endpoint else {
            warn!(
                partner = %relationship.partner,
                "no reachable endpoint for partner notification"
            );
            return;
        };

        let options = SendOptions::default()
            .with_timeout(self.config.send_timeout)
            .with_retries(self.config.http_retries)
            .with_recipient(relationship.partner.as_str())
            .with_message_type(message_type);

        let response = self
            .adapters
            .adapter_for(protocol)
            .send(&endpoint, &payload, &options)
            .await;
        if !response.success {
            warn!(
                partner = %relationship.partner,
                protocol = protocol.as_str(),
                error = response.error.as_deref().unwrap_or("unknown"),
                "partner notification failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_federation::registry::BrokerRecord;
    use crate::core_protocol::didcomm::CONNECT_TYPE_PREFIX;
    use crate::core_protocol::{MemoryTransport, WireError};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn broker(id: &str) -> BrokerId {
        BrokerId::new(id.to_string())
    }

    fn router() -> (
        FederationRouter,
        Arc<MemoryTransport>,
        UnboundedReceiver<ProvenanceTrace>,
    ) {
        let local = broker("did:panmesh:a");
        let transport = Arc::new(MemoryTransport::new());
        let adapters = AdapterSet::new(local.clone(), transport.clone());
        let signer = AssertionSigner::generate(local.clone());
        let (traces, rx) = TraceSink::channel();
        let router = FederationRouter::new(
            local,
            Arc::new(BrokerRegistry::new()),
            Arc::new(TrustLedger::new()),
            adapters,
            signer,
            traces,
        );
        (router, transport, rx)
    }

    async fn register_http(router: &FederationRouter, id: &str, endpoint: &str) {
        router
            .registry()
            .register(BrokerRecord::new(broker(id)).with_endpoint(FederationProtocol::Http, endpoint))
            .await;
    }

    fn drain(rx: &mut UnboundedReceiver<ProvenanceTrace>) -> Vec<TraceOperation> {
        let mut ops = Vec::new();
        while let Ok(trace) = rx.try_recv() {
            ops.push(trace.operation);
        }
        ops
    }

    #[tokio::test]
    async fn establish_defaults_bridge_and_protocol() {
        let (router, _transport, mut rx) = router();

        let relationship = router
            .establish_trust(EstablishTrustRequest::new(
                broker("did:panmesh:b"),
                TrustLevel::FullTrust,
            ))
            .await
            .unwrap();

        assert_eq!(relationship.status, RelationshipStatus::Active);
        assert_eq!(relationship.protocols, vec![FederationProtocol::Http]);
        assert_eq!(relationship.bridges.len(), 1);
        assert_eq!(relationship.bridges[0].from_domain, "did:panmesh:a");
        assert_eq!(relationship.bridges[0].to_domain, "did:panmesh:b");
        assert_eq!(drain(&mut rx), vec![TraceOperation::EstablishTrust]);
    }

    #[tokio::test]
    async fn duplicate_establish_fails_and_traces_nothing() {
        let (router, _transport, mut rx) = router();
        let request = EstablishTrustRequest::new(broker("did:panmesh:b"), TrustLevel::LimitedTrust);

        router.establish_trust(request.clone()).await.unwrap();
        let err = router.establish_trust(request).await.unwrap_err();

        assert!(err.to_string().contains("already exists"));
        assert_eq!(drain(&mut rx), vec![TraceOperation::EstablishTrust]);
    }

    #[tokio::test]
    async fn establishing_with_self_is_rejected() {
        let (router, _transport, _rx) = router();
        let err = router
            .establish_trust(EstablishTrustRequest::new(
                broker("did:panmesh:a"),
                TrustLevel::FullTrust,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::Validation(_)));
    }

    #[tokio::test]
    async fn mutual_establish_fires_connect_message() {
        let (router, transport, _rx) = router();
        router
            .registry()
            .register(
                BrokerRecord::new(broker("did:panmesh:b"))
                    .with_endpoint(FederationProtocol::DidComm, "https://b.example/didcomm"),
            )
            .await;

        router
            .establish_trust(
                EstablishTrustRequest::new(broker("did:panmesh:b"), TrustLevel::LimitedTrust)
                    .with_protocols(vec![FederationProtocol::DidComm])
                    .mutual(),
            )
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let message_type = requests[0].body["type"].as_str().unwrap();
        assert!(message_type.starts_with(CONNECT_TYPE_PREFIX));
        assert_eq!(requests[0].body["body"]["operation"], "establish-trust");
    }

    #[tokio::test(start_paused = true)]
    async fn mutual_establish_survives_unreachable_partner() {
        let (router, transport, _rx) = router();
        register_http(&router, "did:panmesh:b", "https://b.example/federation").await;

        // HTTP adapter retries; script the whole attempt budget as failures
        for _ in 0..4 {
            transport.fail_with(WireError::Connect("refused".to_string()));
        }

        let relationship = router
            .establish_trust(
                EstablishTrustRequest::new(broker("did:panmesh:b"), TrustLevel::FullTrust).mutual(),
            )
            .await
            .unwrap();

        assert_eq!(relationship.status, RelationshipStatus::Active);
        assert!(router.ledger().active(&broker("did:panmesh:b")).await.is_some());
    }

    #[tokio::test]
    async fn revoke_notifies_partner_and_is_terminal() {
        let (router, transport, mut rx) = router();
        register_http(&router, "did:panmesh:b", "https://b.example/federation").await;

        router
            .establish_trust(EstablishTrustRequest::new(
                broker("did:panmesh:b"),
                TrustLevel::FullTrust,
            ))
            .await
            .unwrap();

        let revoked = router
            .revoke_trust(
                RevokeTrustRequest::new(broker("did:panmesh:b"), "key compromise")
                    .revoking_bridges()
                    .notifying_partner(),
            )
            .await
            .unwrap();

        assert_eq!(revoked.status, RelationshipStatus::Revoked);
        assert!(revoked.bridges.iter().all(|b| b.revoked));
        assert_eq!(transport.request_count(), 1);
        assert_eq!(
            transport.requests()[0].body["operation"],
            "revoke-trust"
        );

        let err = router
            .revoke_trust(RevokeTrustRequest::new(broker("did:panmesh:b"), "again"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already revoked"));

        assert_eq!(
            drain(&mut rx),
            vec![TraceOperation::EstablishTrust, TraceOperation::RevokeTrust]
        );
    }

    #[tokio::test]
    async fn federate_limited_trust_over_http() {
        let (router, transport, mut rx) = router();
        register_http(&router, "did:panmesh:c", "https://c.example/federation").await;

        router
            .establish_trust(EstablishTrustRequest::new(
                broker("did:panmesh:c"),
                TrustLevel::LimitedTrust,
            ))
            .await
            .unwrap();

        let grant = router
            .federate_context(
                FederateContextRequest::new(
                    broker("did:panmesh:c"),
                    vec!["urn:resource:inventory".to_string()],
                )
                .over(FederationProtocol::Http),
            )
            .await
            .unwrap();

        assert_eq!(grant.path.len(), 1);
        assert_eq!(grant.hop_count, 1);
        assert_eq!(grant.path[0].hop_number, 1);
        assert_eq!(grant.affordances.len(), 1);
        assert_eq!(grant.affordances[0].resource_urn, "urn:resource:inventory");
        assert_eq!(grant.affordances[0].action, AccessLevel::Observe);
        assert!(grant.affordances[0].requires_crossdomain_auth);

        let request = &transport.requests()[0];
        assert!(request.body.get("assertion").is_some(), "limited trust attaches an assertion");
        assert!(request
            .headers
            .iter()
            .any(|(k, v)| k == "X-Trust-Level" && v == "LimitedTrust"));

        // Hop entered the relationship audit trail
        let relationship = router.ledger().active(&broker("did:panmesh:c")).await.unwrap();
        assert_eq!(relationship.hops.len(), 1);

        assert_eq!(
            drain(&mut rx),
            vec![TraceOperation::EstablishTrust, TraceOperation::FederateContext]
        );
    }

    #[tokio::test]
    async fn full_trust_skips_the_assertion() {
        let (router, transport, _rx) = router();
        register_http(&router, "did:panmesh:b", "https://b.example/federation").await;

        router
            .establish_trust(EstablishTrustRequest::new(
                broker("did:panmesh:b"),
                TrustLevel::FullTrust,
            ))
            .await
            .unwrap();

        let grant = router
            .federate_context(FederateContextRequest::new(
                broker("did:panmesh:b"),
                vec!["urn:resource:ledger".to_string()],
            ))
            .await
            .unwrap();

        assert!(!grant.affordances[0].requires_crossdomain_auth);
        let request = &transport.requests()[0];
        assert!(request.body.get("assertion").is_none());
    }

    #[tokio::test]
    async fn hop_limit_blocks_at_the_boundary() {
        let (router, transport, mut rx) = router();
        register_http(&router, "did:panmesh:b", "https://b.example/federation").await;

        router
            .establish_trust(EstablishTrustRequest::new(
                broker("did:panmesh:b"),
                TrustLevel::FullTrust,
            ))
            .await
            .unwrap();
        let _ = drain(&mut rx);

        // Hop 5 is the last allowed with the default budget of 5
        let grant = router
            .federate_context(
                FederateContextRequest::new(
                    broker("did:panmesh:b"),
                    vec!["urn:resource:inventory".to_string()],
                )
                .relayed(4, Vec::new()),
            )
            .await
            .unwrap();
        assert_eq!(grant.hop_count, 5);

        let before_hops = router
            .ledger()
            .active(&broker("did:panmesh:b"))
            .await
            .unwrap()
            .hops
            .len();
        let wire_calls = transport.request_count();
        let _ = drain(&mut rx);

        let err = router
            .federate_context(
                FederateContextRequest::new(
                    broker("did:panmesh:b"),
                    vec!["urn:resource:inventory".to_string()],
                )
                .relayed(5, Vec::new()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FederationError::HopLimitExceeded { current: 5, limit: 5 }));
        assert!(err.to_string().contains("hop limit exceeded"));

        // No side effects: no wire call, no hop, no trace
        assert_eq!(transport.request_count(), wire_calls);
        let after_hops = router
            .ledger()
            .active(&broker("did:panmesh:b"))
            .await
            .unwrap()
            .hops
            .len();
        assert_eq!(after_hops, before_hops);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn caller_hop_budget_narrows_but_never_widens() {
        let (router, _transport, _rx) = router();
        register_http(&router, "did:panmesh:b", "https://b.example/federation").await;
        router
            .establish_trust(EstablishTrustRequest::new(
                broker("did:panmesh:b"),
                TrustLevel::FullTrust,
            ))
            .await
            .unwrap();

        let err = router
            .federate_context(
                FederateContextRequest::new(
                    broker("did:panmesh:b"),
                    vec!["urn:resource:x".to_string()],
                )
                .with_max_hops(2)
                .relayed(2, Vec::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::HopLimitExceeded { limit: 2, .. }));

        // Asking for 50 still clamps to the instance budget of 5
        let err = router
            .federate_context(
                FederateContextRequest::new(
                    broker("did:panmesh:b"),
                    vec!["urn:resource:x".to_string()],
                )
                .with_max_hops(50)
                .relayed(5, Vec::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::HopLimitExceeded { limit: 5, .. }));
    }

    #[tokio::test]
    async fn unsupported_protocol_fails_despite_active_trust() {
        let (router, transport, _rx) = router();
        register_http(&router, "did:panmesh:b", "https://b.example/federation").await;
        router
            .establish_trust(EstablishTrustRequest::new(
                broker("did:panmesh:b"),
                TrustLevel::FullTrust,
            ))
            .await
            .unwrap();

        let err = router
            .federate_context(
                FederateContextRequest::new(
                    broker("did:panmesh:b"),
                    vec!["urn:resource:x".to_string()],
                )
                .over(FederationProtocol::DidComm),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FederationError::ProtocolNotSupported { .. }));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn missing_bridge_fails() {
        let (router, _transport, _rx) = router();
        register_http(&router, "did:panmesh:b", "https://b.example/federation").await;
        router
            .establish_trust(EstablishTrustRequest::new(
                broker("did:panmesh:b"),
                TrustLevel::FullTrust,
            ))
            .await
            .unwrap();

        let err = router
            .federate_context(
                FederateContextRequest::new(
                    broker("did:panmesh:b"),
                    vec!["urn:resource:x".to_string()],
                )
                .via_bridge(BridgeId::new("bridge-that-never-was".to_string())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::BridgeNotFound(_)));
    }

    #[tokio::test]
    async fn transport_failure_leaves_no_partial_path() {
        let (router, transport, mut rx) = router();
        register_http(&router, "did:panmesh:b", "https://b.example/federation").await;
        router
            .establish_trust(EstablishTrustRequest::new(
                broker("did:panmesh:b"),
                TrustLevel::FullTrust,
            ))
            .await
            .unwrap();
        let _ = drain(&mut rx);

        transport.reply_status(503);
        let err = router
            .federate_context(FederateContextRequest::new(
                broker("did:panmesh:b"),
                vec!["urn:resource:x".to_string()],
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, FederationError::Transport(_)));
        let relationship = router.ledger().active(&broker("did:panmesh:b")).await.unwrap();
        assert!(relationship.hops.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn unknown_and_revoked_targets_are_distinguished() {
        let (router, _transport, _rx) = router();
        register_http(&router, "did:panmesh:b", "https://b.example/federation").await;

        let err = router
            .federate_context(FederateContextRequest::new(
                broker("did:panmesh:b"),
                vec!["urn:resource:x".to_string()],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::RelationshipNotFound(_)));

        router
            .establish_trust(EstablishTrustRequest::new(
                broker("did:panmesh:b"),
                TrustLevel::FullTrust,
            ))
            .await
            .unwrap();
        router
            .revoke_trust(RevokeTrustRequest::new(broker("did:panmesh:b"), "done"))
            .await
            .unwrap();

        let err = router
            .federate_context(FederateContextRequest::new(
                broker("did:panmesh:b"),
                vec!["urn:resource:x".to_string()],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::RelationshipInactive(_)));
    }

    #[tokio::test]
    async fn expiry_sweep_traces_each_transition() {
        let (router, _transport, mut rx) = router();

        router
            .establish_trust(
                EstablishTrustRequest::new(broker("did:panmesh:b"), TrustLevel::LimitedTrust)
                    .with_expiry(Timestamp::from_millis(Timestamp::now().as_millis() + 50)),
            )
            .await
            .unwrap();
        let _ = drain(&mut rx);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let swept = router.sweep_expired_trust().await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].revocation_reason.as_deref(), Some("expired"));
        assert_eq!(drain(&mut rx), vec![TraceOperation::RevokeTrust]);
    }
}
