pub mod broker;
pub mod config;
pub mod core_context;
pub mod core_federation;
pub mod core_protocol;
pub mod logging;
pub mod metrics;
pub mod provenance;
pub mod storage;

pub use broker::{BrokerError, BrokerResult, MeshBroker, SyncReport};
pub use config::Config;
pub use logging::{init_logging, LogLevel};
pub use provenance::{ProvenanceTrace, TraceOperation, TraceSink};
