/*
    http.rs - Plain HTTP federation adapter

    POSTs JSON-LD directly; routing metadata rides out-of-band in
    X-Federation-Protocol / X-Source-Broker / X-Recipient-DID headers
    (the router adds X-Trust-Level and auth through extra_headers).

    Retry policy: transport failures only, up to options.retries, with
    2^attempt-second backoff. A completed exchange with a non-2xx
    status is an application failure and is returned immediately.
*/

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core_context::model::types::BrokerId;
use crate::core_federation::types::FederationProtocol;
use crate::core_protocol::adapter::ProtocolAdapter;
use crate::core_protocol::error::ProtocolResult;
use crate::core_protocol::transport::WireTransport;
use crate::core_protocol::types::{AdapterResponse, SendOptions};

pub struct HttpAdapter {
    identity: BrokerId,
    transport: Arc<dyn WireTransport>,
}

impl HttpAdapter {
    pub fn new(identity: BrokerId, transport: Arc<dyn WireTransport>) -> Self {
        HttpAdapter { identity, transport }
    }

    fn headers(&self, options: &SendOptions) -> Vec<(String, String)> {
        let mut headers = vec![
            (
                "X-Federation-Protocol".to_string(),
                FederationProtocol::Http.as_str().to_string(),
            ),
            ("X-Source-Broker".to_string(), self.identity.to_string()),
        ];
        if let Some(recipient) = &options.recipient {
            headers.push(("X-Recipient-DID".to_string(), recipient.clone()));
        }
        headers.extend(options.extra_headers.iter().cloned());
        headers
    }
}

#[async_trait]
impl ProtocolAdapter for HttpAdapter {
    fn protocol(&self) -> FederationProtocol {
        FederationProtocol::Http
    }

    async fn send(&self, endpoint: &str, payload: &Value, options: &SendOptions) -> AdapterResponse {
        let headers = self.headers(options);
        let mut attempt: u32 = 0;

        loop {
            match self
                .transport
                .post_json(endpoint, payload, &headers, options.timeout)
                .await
            {
                Ok(reply) if reply.is_success() => {
                    debug!(endpoint, status = reply.status, attempt, "http federation send ok");
                    return AdapterResponse::ok(reply.status, reply.body, reply.headers);
                }
                Ok(reply) => {
                    // Application error: the peer answered, retrying
                    // would resend the same rejected request
                    return AdapterResponse::failed_with_status(
                        reply.status,
                        format!("endpoint {} answered {}", endpoint, reply.status),
                    );
                }
                Err(err) => {
                    if attempt >= options.retries {
                        return AdapterResponse::failed(format!(
                            "transport failure after {} attempts: {}",
                            attempt + 1,
                            err
                        ));
                    }
                    let backoff = Duration::from_secs(1u64 << attempt);
                    warn!(
                        endpoint,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %err,
                        "http federation send failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    fn parse(&self, raw: &Value) -> ProtocolResult<Value> {
        // HTTP carries the payload bare; nothing to unwrap
        Ok(raw.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_protocol::error::WireError;
    use crate::core_protocol::transport::MemoryTransport;
    use serde_json::json;

    fn adapter(transport: Arc<MemoryTransport>) -> HttpAdapter {
        HttpAdapter::new(BrokerId::new("did:panmesh:a".to_string()), transport)
    }

    #[tokio::test]
    async fn success_carries_routing_headers() {
        let transport = Arc::new(MemoryTransport::new());
        let adapter = adapter(transport.clone());
        let options = SendOptions::default()
            .with_recipient("did:panmesh:b")
            .with_header("X-Trust-Level", "limited_trust");

        let response = adapter
            .send("https://b.example/federation", &json!({"op": "ping"}), &options)
            .await;
        assert!(response.success);
        assert_eq!(response.status, Some(200));

        let request = &transport.requests()[0];
        let header = |name: &str| {
            request
                .headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(header("X-Federation-Protocol").as_deref(), Some("HTTP"));
        assert_eq!(header("X-Source-Broker").as_deref(), Some("did:panmesh:a"));
        assert_eq!(header("X-Recipient-DID").as_deref(), Some("did:panmesh:b"));
        assert_eq!(header("X-Trust-Level").as_deref(), Some("limited_trust"));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_retry_with_backoff() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_with(WireError::Connect("refused".to_string()));
        transport.fail_with(WireError::Connect("refused".to_string()));
        transport.reply_status(200);

        let adapter = adapter(transport.clone());
        let response = adapter
            .send("https://b.example/federation", &json!({}), &SendOptions::default())
            .await;

        assert!(response.success);
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_exhausted_then_reported() {
        let transport = Arc::new(MemoryTransport::new());
        for _ in 0..4 {
            transport.fail_with(WireError::Connect("refused".to_string()));
        }

        let adapter = adapter(transport.clone());
        let options = SendOptions::default().with_retries(3);
        let response = adapter.send("https://b.example/federation", &json!({}), &options).await;

        assert!(!response.success);
        assert_eq!(transport.request_count(), 4, "initial attempt plus three retries");
        assert!(response.error.as_deref().unwrap_or("").contains("4 attempts"));
    }

    #[tokio::test]
    async fn application_errors_do_not_retry() {
        let transport = Arc::new(MemoryTransport::new());
        transport.reply_status(403);

        let adapter = adapter(transport.clone());
        let response = adapter
            .send("https://b.example/federation", &json!({}), &SendOptions::default())
            .await;

        assert!(!response.success);
        assert_eq!(response.status, Some(403));
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn parse_passes_payload_through() {
        let transport = Arc::new(MemoryTransport::new());
        let adapter = adapter(transport);
        let payload = json!({"op": "federate", "urns": ["urn:resource:inventory"]});
        assert_eq!(adapter.parse(&payload).unwrap(), payload);
    }
}
