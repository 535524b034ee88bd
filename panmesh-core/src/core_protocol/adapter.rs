/*
    adapter.rs - Protocol adapter contract

    One adapter per wire protocol, all behind a single trait:
    send(endpoint, payload, options) and parse(raw). AdapterSet is the
    closed dispatch table: adding a protocol means extending the enum,
    the set, and the match, all checked at compile time.
*/

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::core_context::model::types::BrokerId;
use crate::core_federation::types::FederationProtocol;
use crate::core_protocol::activitypub::ActivityPubAdapter;
use crate::core_protocol::didcomm::DidCommAdapter;
use crate::core_protocol::error::ProtocolResult;
use crate::core_protocol::http::HttpAdapter;
use crate::core_protocol::ldn::LdnAdapter;
use crate::core_protocol::transport::WireTransport;
use crate::core_protocol::types::{AdapterResponse, SendOptions};

/// Translates generic federation requests into one wire encoding
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn protocol(&self) -> FederationProtocol;

    /// Deliver a payload to an endpoint. Transport failures come back
    /// as success=false, never as a panic or error the caller must
    /// catch.
    async fn send(&self, endpoint: &str, payload: &Value, options: &SendOptions)
        -> AdapterResponse;

    /// Unwrap an inbound wire message into its domain payload
    fn parse(&self, raw: &Value) -> ProtocolResult<Value>;
}

/// All four adapters for one broker identity, sharing one transport
pub struct AdapterSet {
    http: HttpAdapter,
    didcomm: DidCommAdapter,
    activitypub: ActivityPubAdapter,
    ldn: LdnAdapter,
}

impl AdapterSet {
    pub fn new(identity: BrokerId, transport: Arc<dyn WireTransport>) -> Self {
        AdapterSet {
            http: HttpAdapter::new(identity.clone(), transport.clone()),
            didcomm: DidCommAdapter::new(identity.clone(), transport.clone()),
            activitypub: ActivityPubAdapter::new(identity.clone(), transport.clone()),
            ldn: LdnAdapter::new(identity, transport),
        }
    }

    pub fn adapter_for(&self, protocol: FederationProtocol) -> &dyn ProtocolAdapter {
        match protocol {
            FederationProtocol::Http => &self.http,
            FederationProtocol::DidComm => &self.didcomm,
            FederationProtocol::ActivityPub => &self.activitypub,
            FederationProtocol::Ldn => &self.ldn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_protocol::transport::MemoryTransport;

    #[test]
    fn dispatch_covers_every_protocol() {
        let transport = Arc::new(MemoryTransport::new());
        let set = AdapterSet::new(BrokerId::new("did:panmesh:a".to_string()), transport);

        for protocol in FederationProtocol::all() {
            assert_eq!(set.adapter_for(protocol).protocol(), protocol);
        }
    }
}
