/*
    types.rs - Adapter request/response shapes

    The adapter contract is send(endpoint, payload, options) ->
    AdapterResponse. Failures after retry exhaustion come back as
    success=false with a message; adapters never raise past their own
    boundary.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRIES: u32 = 3;

/// Per-call options handed to an adapter
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Budget for one wire attempt; in-flight calls are aborted when it
    /// elapses
    pub timeout: Duration,

    /// Transport-failure retry budget. Only the HTTP adapter retries.
    pub retries: u32,

    /// Target broker DID, for envelopes that address inline (`to`
    /// fields) and the X-Recipient-DID header
    pub recipient: Option<String>,

    /// Override for the DIDComm message type URI
    pub message_type: Option<String>,

    /// Extra headers: bearer assertions and routing metadata set by the
    /// router, passed through to the wire verbatim
    pub extra_headers: Vec<(String, String)>,
}

impl Default for SendOptions {
    fn default() -> Self {
        SendOptions {
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            recipient: None,
            message_type: None,
            extra_headers: Vec::new(),
        }
    }
}

impl SendOptions {
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }
}

/// Structured outcome of one adapter send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub success: bool,
    /// HTTP-level status when a wire exchange completed
    pub status: Option<u16>,
    /// Parsed response payload, when the peer returned one
    pub data: Option<Value>,
    /// Failure description when success is false
    pub error: Option<String>,
    /// Response headers, when a wire exchange completed
    pub headers: Option<HashMap<String, String>>,
}

impl AdapterResponse {
    pub fn ok(status: u16, data: Option<Value>, headers: HashMap<String, String>) -> Self {
        AdapterResponse {
            success: true,
            status: Some(status),
            data,
            error: None,
            headers: Some(headers),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        AdapterResponse {
            success: false,
            status: None,
            data: None,
            error: Some(message.into()),
            headers: None,
        }
    }

    pub fn failed_with_status(status: u16, message: impl Into<String>) -> Self {
        AdapterResponse {
            success: false,
            status: Some(status),
            data: None,
            error: Some(message.into()),
            headers: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.as_ref().and_then(|headers| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let options = SendOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.retries, 3);
        assert!(options.recipient.is_none());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("location".to_string(), "https://x.example/inbox/1".to_string());
        let response = AdapterResponse::ok(201, None, headers);
        assert_eq!(response.header("Location"), Some("https://x.example/inbox/1"));
    }
}
