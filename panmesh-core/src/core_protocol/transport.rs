/*
    transport.rs - Wire transport seam

    All four adapters speak JSON over HTTP POST; the WireTransport trait
    is the seam between envelope logic and the actual network so tests
    and in-process harnesses can swap the wire out. The reqwest-backed
    implementation enforces the caller's timeout by aborting the
    in-flight future.

    A reply with any HTTP status is Ok at this layer. WireError is
    reserved for transport-class failures, which is exactly the set the
    HTTP adapter may retry.
*/

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tracing::trace;

use crate::core_protocol::error::WireError;

/// Completed wire exchange, whatever the status code
#[derive(Debug, Clone)]
pub struct WireReply {
    pub status: u16,
    pub body: Option<Value>,
    pub headers: HashMap<String, String>,
}

impl WireReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// JSON-POST transport underneath the protocol adapters
#[async_trait]
pub trait WireTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<WireReply, WireError>;
}

/// Production transport over reqwest
pub struct HttpWireTransport {
    client: reqwest::Client,
}

impl HttpWireTransport {
    pub fn new() -> Self {
        HttpWireTransport {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        HttpWireTransport { client }
    }
}

impl Default for HttpWireTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WireTransport for HttpWireTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<WireReply, WireError> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        // One timeout covers send plus body read; elapsing it aborts
        // the in-flight call
        let exchange = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let reply_headers: HashMap<String, String> = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        v.to_str().unwrap_or_default().to_string(),
                    )
                })
                .collect();
            let reply_body = response.json::<Value>().await.ok();
            Ok::<WireReply, WireError>(WireReply {
                status,
                body: reply_body,
                headers: reply_headers,
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => {
                if let Ok(reply) = &result {
                    trace!(url, status = reply.status, "wire exchange complete");
                }
                result
            }
            Err(_) => Err(WireError::Timeout(timeout)),
        }
    }
}

/// Recorded request seen by a MemoryTransport
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub body: Value,
    pub headers: Vec<(String, String)>,
}

/// In-memory transport for tests and in-process harnesses. Replies are
/// scripted in FIFO order; once the script runs dry every call gets a
/// plain 200 with no body.
pub struct MemoryTransport {
    script: Mutex<VecDeque<Result<WireReply, WireError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        MemoryTransport {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue the next reply
    pub fn reply_with(&self, reply: WireReply) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(reply));
        }
    }

    /// Queue the next failure
    pub fn fail_with(&self, error: WireError) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error));
        }
    }

    /// Shorthand for a status-only reply
    pub fn reply_status(&self, status: u16) {
        self.reply_with(WireReply {
            status,
            body: None,
            headers: HashMap::new(),
        });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WireTransport for MemoryTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
        _timeout: Duration,
    ) -> Result<WireReply, WireError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                url: url.to_string(),
                body: body.clone(),
                headers: headers.to_vec(),
            });
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(result) => result,
            None => Ok(WireReply {
                status: 200,
                body: None,
                headers: HashMap::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_transport_records_and_scripts() {
        let transport = MemoryTransport::new();
        transport.reply_status(201);
        transport.fail_with(WireError::Connect("refused".to_string()));

        let reply = transport
            .post_json(
                "https://b.example/inbox",
                &json!({"k": "v"}),
                &[("X-Source-Broker".to_string(), "did:panmesh:a".to_string())],
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(reply.status, 201);

        let err = transport
            .post_json("https://b.example/inbox", &json!({}), &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Connect(_)));

        // Script exhausted: default 200
        let reply = transport
            .post_json("https://b.example/inbox", &json!({}), &[], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.status, 200);

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].url, "https://b.example/inbox");
        assert_eq!(requests[0].headers[0].1, "did:panmesh:a");
    }

    #[test]
    fn wire_reply_header_lookup_ignores_case() {
        let mut headers = HashMap::new();
        headers.insert("location".to_string(), "/x/1".to_string());
        let reply = WireReply { status: 201, body: None, headers };
        assert_eq!(reply.header("Location"), Some("/x/1"));
        assert!(reply.is_success());
    }
}
