/*
    ldn.rs - Linked Data Notifications adapter

    Posts an Announce-type JSON-LD notification to a partner's inbox.
    LDN receivers acknowledge by creating a resource: success requires
    a 2xx status AND an echoed Location header pointing at it. A 2xx
    without Location means the inbox did not actually record the
    notification.

    No self-retries.
*/

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::core_context::model::types::BrokerId;
use crate::core_federation::types::FederationProtocol;
use crate::core_protocol::activitypub::ACTIVITYSTREAMS_CONTEXT;
use crate::core_protocol::adapter::ProtocolAdapter;
use crate::core_protocol::error::{ProtocolError, ProtocolResult};
use crate::core_protocol::transport::WireTransport;
use crate::core_protocol::types::{AdapterResponse, SendOptions};

pub struct LdnAdapter {
    identity: BrokerId,
    transport: Arc<dyn WireTransport>,
}

impl LdnAdapter {
    pub fn new(identity: BrokerId, transport: Arc<dyn WireTransport>) -> Self {
        LdnAdapter { identity, transport }
    }

    fn notification(&self, payload: &Value) -> Value {
        json!({
            "@context": ACTIVITYSTREAMS_CONTEXT,
            "@id": format!("urn:uuid:{}", Uuid::new_v4()),
            "@type": "Announce",
            "actor": self.identity.as_str(),
            "object": payload,
        })
    }
}

#[async_trait]
impl ProtocolAdapter for LdnAdapter {
    fn protocol(&self) -> FederationProtocol {
        FederationProtocol::Ldn
    }

    async fn send(&self, endpoint: &str, payload: &Value, options: &SendOptions) -> AdapterResponse {
        let notification = self.notification(payload);

        match self
            .transport
            .post_json(endpoint, &notification, &options.extra_headers, options.timeout)
            .await
        {
            Ok(reply) if reply.is_success() => match reply.header("Location") {
                Some(location) => {
                    debug!(endpoint, location, "ldn notification recorded");
                    AdapterResponse::ok(reply.status, reply.body, reply.headers)
                }
                None => AdapterResponse::failed_with_status(
                    reply.status,
                    format!("inbox {} accepted without a Location header", endpoint),
                ),
            },
            Ok(reply) => AdapterResponse::failed_with_status(
                reply.status,
                format!("ldn inbox {} answered {}", endpoint, reply.status),
            ),
            Err(err) => AdapterResponse::failed(format!("ldn transport failure: {}", err)),
        }
    }

    fn parse(&self, raw: &Value) -> ProtocolResult<Value> {
        let notification_type = raw
            .get("@type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidEnvelope("missing '@type'".to_string()))?;
        if notification_type != "Announce" {
            return Err(ProtocolError::InvalidEnvelope(format!(
                "expected Announce notification, got {}",
                notification_type
            )));
        }

        raw.get("object")
            .cloned()
            .ok_or_else(|| ProtocolError::InvalidEnvelope("missing 'object'".to_string()))
    }
}
