/*
    core_protocol - Federation wire adapters

    Translates generic (endpoint, payload, options) requests into the
    four wire encodings brokers federate over: HTTP, DIDComm v2,
    ActivityPub, and LDN. Adapters are stateless beyond the broker
    identity stamped into envelopes and share one WireTransport.
*/

pub mod activitypub;
pub mod adapter;
pub mod didcomm;
pub mod error;
pub mod http;
pub mod ldn;
pub mod transport;
pub mod types;

pub use activitypub::ActivityPubAdapter;
pub use adapter::{AdapterSet, ProtocolAdapter};
pub use didcomm::DidCommAdapter;
pub use error::{ProtocolError, ProtocolResult, WireError};
pub use http::HttpAdapter;
pub use ldn::LdnAdapter;
pub use transport::{HttpWireTransport, MemoryTransport, RecordedRequest, WireReply, WireTransport};
pub use types::{AdapterResponse, SendOptions, DEFAULT_RETRIES, DEFAULT_TIMEOUT};
