/*
    activitypub.rs - ActivityPub federation adapter

    Wraps payloads in a Create activity whose object is a Note carrying
    the payload as content. `published` is ISO-8601. A 202 Accepted is
    the normal fediverse answer and counts as success with no body.

    No self-retries.
*/

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::core_context::model::types::BrokerId;
use crate::core_federation::types::FederationProtocol;
use crate::core_protocol::adapter::ProtocolAdapter;
use crate::core_protocol::error::{ProtocolError, ProtocolResult};
use crate::core_protocol::transport::WireTransport;
use crate::core_protocol::types::{AdapterResponse, SendOptions};

pub const ACTIVITYSTREAMS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Extension context for federation vocabulary
pub const FEDERATION_CONTEXT: &str = "https://panmesh.dev/ns/federation";

pub struct ActivityPubAdapter {
    identity: BrokerId,
    transport: Arc<dyn WireTransport>,
}

impl ActivityPubAdapter {
    pub fn new(identity: BrokerId, transport: Arc<dyn WireTransport>) -> Self {
        ActivityPubAdapter { identity, transport }
    }

    fn activity(&self, endpoint: &str, payload: &Value, options: &SendOptions) -> Value {
        let target = options
            .recipient
            .clone()
            .unwrap_or_else(|| endpoint.to_string());

        json!({
            "@context": [ACTIVITYSTREAMS_CONTEXT, FEDERATION_CONTEXT],
            "id": format!("urn:uuid:{}", Uuid::new_v4()),
            "type": "Create",
            "actor": self.identity.as_str(),
            "object": {
                "type": "Note",
                "content": payload,
            },
            "target": target.clone(),
            "published": Utc::now().to_rfc3339(),
            "to": [target],
        })
    }
}

#[async_trait]
impl ProtocolAdapter for ActivityPubAdapter {
    fn protocol(&self) -> FederationProtocol {
        FederationProtocol::ActivityPub
    }

    async fn send(&self, endpoint: &str, payload: &Value, options: &SendOptions) -> AdapterResponse {
        let activity = self.activity(endpoint, payload, options);

        match self
            .transport
            .post_json(endpoint, &activity, &options.extra_headers, options.timeout)
            .await
        {
            Ok(reply) if reply.status == 202 => {
                debug!(endpoint, "activitypub send accepted");
                AdapterResponse::ok(202, None, reply.headers)
            }
            Ok(reply) if reply.is_success() => {
                AdapterResponse::ok(reply.status, reply.body, reply.headers)
            }
            Ok(reply) => AdapterResponse::failed_with_status(
                reply.status,
                format!("activitypub inbox {} answered {}", endpoint, reply.status),
            ),
            Err(err) => AdapterResponse::failed(format!("activitypub transport failure: {}", err)),
        }
    }

    fn parse(&self, raw: &Value) -> ProtocolResult<Value> {
        raw.get("@context")
            .ok_or_else(|| ProtocolError::InvalidEnvelope("missing '@context'".to_string()))?;

        let activity_type = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidEnvelope("missing 'type'".to_string()))?;
        if activity_type != "Create" {
            return Err(ProtocolError::InvalidEnvelope(format!(
                "expected Create activity, got {}",
                activity_type
            )));
        }

        raw.pointer("/object/content")
            .cloned()
            .ok_or_else(|| ProtocolError::InvalidEnvelope("missing object content".to_string()))
    }
}
