//! Broker Layer - Orchestration for Federated Context Sharing
//!
//! This module provides the high-level API for a PanMesh broker by
//! coordinating the `core_federation`, `core_context`, and
//! `core_protocol` subsystems over shared persistence.

pub mod errors;
pub mod mesh_broker;
pub mod types;

// Re-exports
pub use errors::{BrokerError, BrokerResult};
pub use mesh_broker::{config_for, MeshBroker};
pub use types::SyncReport;
