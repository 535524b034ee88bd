/*
    didcomm.rs - DIDComm v2 federation adapter

    Wraps payloads in a DIDComm v2 plaintext envelope:
    {id, type, from, to[], created_time, expires_time, body,
    return_route:"all"} with times in epoch seconds and a one-hour
    expiry. Federation requests use the federation namespace;
    connect/accept/reject handshake messages use the separate
    federation-connect namespace.

    No self-retries: one attempt, success iff the peer answered 2xx.
*/

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::core_context::model::types::{BrokerId, Timestamp};
use crate::core_federation::types::FederationProtocol;
use crate::core_protocol::adapter::ProtocolAdapter;
use crate::core_protocol::error::{ProtocolError, ProtocolResult};
use crate::core_protocol::transport::WireTransport;
use crate::core_protocol::types::{AdapterResponse, SendOptions};

/// Namespace for federation request/response messages
pub const FEDERATION_TYPE_PREFIX: &str = "https://panmesh.dev/protocols/federation/1.0/";

/// Namespace for trust handshake (connect/accept/reject) messages
pub const CONNECT_TYPE_PREFIX: &str = "https://panmesh.dev/protocols/federation-connect/1.0/";

/// Envelope lifetime in seconds
pub const MESSAGE_TTL_SECS: u64 = 3600;

pub fn federation_type(kind: &str) -> String {
    format!("{}{}", FEDERATION_TYPE_PREFIX, kind)
}

pub fn connect_type(kind: &str) -> String {
    format!("{}{}", CONNECT_TYPE_PREFIX, kind)
}

pub struct DidCommAdapter {
    identity: BrokerId,
    transport: Arc<dyn WireTransport>,
}

impl DidCommAdapter {
    pub fn new(identity: BrokerId, transport: Arc<dyn WireTransport>) -> Self {
        DidCommAdapter { identity, transport }
    }

    fn envelope(&self, payload: &Value, options: &SendOptions) -> Value {
        let created = Timestamp::now().as_secs();
        let to: Vec<String> = options.recipient.iter().cloned().collect();
        let message_type = options
            .message_type
            .clone()
            .unwrap_or_else(|| federation_type("request"));

        json!({
            "id": Uuid::new_v4().to_string(),
            "type": message_type,
            "from": self.identity.as_str(),
            "to": to,
            "created_time": created,
            "expires_time": created + MESSAGE_TTL_SECS,
            "body": payload,
            "return_route": "all",
        })
    }
}

#[async_trait]
impl ProtocolAdapter for DidCommAdapter {
    fn protocol(&self) -> FederationProtocol {
        FederationProtocol::DidComm
    }

    async fn send(&self, endpoint: &str, payload: &Value, options: &SendOptions) -> AdapterResponse {
        let envelope = self.envelope(payload, options);

        match self
            .transport
            .post_json(endpoint, &envelope, &options.extra_headers, options.timeout)
            .await
        {
            Ok(reply) if reply.is_success() => {
                // Peers answer with an envelope of their own; hand the
                // caller its body
                let data = reply.body.map(|raw| match raw.get("body") {
                    Some(body) => body.clone(),
                    None => raw,
                });
                debug!(endpoint, status = reply.status, "didcomm send ok");
                AdapterResponse::ok(reply.status, data, reply.headers)
            }
            Ok(reply) => AdapterResponse::failed_with_status(
                reply.status,
                format!("didcomm endpoint {} answered {}", endpoint, reply.status),
            ),
            Err(err) => AdapterResponse::failed(format!("didcomm transport failure: {}", err)),
        }
    }

    fn parse(&self, raw: &Value) -> ProtocolResult<Value> {
        let message_type = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidEnvelope("missing 'type'".to_string()))?;
        if !message_type.starts_with(FEDERATION_TYPE_PREFIX)
            && !message_type.starts_with(CONNECT_TYPE_PREFIX)
        {
            return Err(ProtocolError::InvalidEnvelope(format!(
                "unrecognized message type {}",
                message_type
            )));
        }

        raw.get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidEnvelope("missing 'id'".to_string()))?;
        raw.get("from")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidEnvelope("missing 'from'".to_string()))?;

        raw.get("body")
            .cloned()
            .ok_or_else(|| ProtocolError::InvalidEnvelope("missing 'body'".to_string()))
    }
}
