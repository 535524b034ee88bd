/*
    registry.rs - Broker registry

    Explicit per-instance directory of known partner brokers and their
    protocol endpoints. There is no process-wide registry: every router
    and store is handed the registry it should consult, so two broker
    instances in one process never observe each other's peers.

    Peers enter the registry only through explicit registration; there
    is no discovery.
*/

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core_context::model::types::{BrokerId, Timestamp};
use crate::core_federation::error::{FederationError, FederationResult};
use crate::core_federation::types::FederationProtocol;

/// Everything this broker knows about one partner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerRecord {
    pub broker: BrokerId,

    /// Friendly label for logs and UIs
    pub display_name: Option<String>,

    /// Reachable endpoint per wire protocol. A partner absent from a
    /// protocol's map cannot be addressed over that protocol.
    pub endpoints: HashMap<FederationProtocol, String>,

    /// Ed25519 verifying key for checking signed assertions, when known
    pub verifying_key: Option<Vec<u8>>,

    pub registered_at: Timestamp,
}

impl BrokerRecord {
    pub fn new(broker: BrokerId) -> Self {
        BrokerRecord {
            broker,
            display_name: None,
            endpoints: HashMap::new(),
            verifying_key: None,
            registered_at: Timestamp::now(),
        }
    }

    pub fn with_endpoint(mut self, protocol: FederationProtocol, endpoint: impl Into<String>) -> Self {
        self.endpoints.insert(protocol, endpoint.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_verifying_key(mut self, key: Vec<u8>) -> Self {
        self.verifying_key = Some(key);
        self
    }
}

/// Directory of partner brokers for one local broker instance
pub struct BrokerRegistry {
    brokers: RwLock<HashMap<BrokerId, BrokerRecord>>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        BrokerRegistry {
            brokers: RwLock::new(HashMap::new()),
        }
    }

    /// Register or refresh a partner record. Returns true when the
    /// broker was previously unknown.
    pub async fn register(&self, record: BrokerRecord) -> bool {
        let mut brokers = self.brokers.write().await;
        let is_new = !brokers.contains_key(&record.broker);
        info!(
            broker = %record.broker,
            protocols = record.endpoints.len(),
            new = is_new,
            "registered broker"
        );
        brokers.insert(record.broker.clone(), record);
        is_new
    }

    pub async fn unregister(&self, broker: &BrokerId) -> bool {
        let mut brokers = self.brokers.write().await;
        let removed = brokers.remove(broker).is_some();
        if removed {
            debug!(broker = %broker, "unregistered broker");
        }
        removed
    }

    pub async fn get(&self, broker: &BrokerId) -> Option<BrokerRecord> {
        self.brokers.read().await.get(broker).cloned()
    }

    pub async fn is_registered(&self, broker: &BrokerId) -> bool {
        self.brokers.read().await.contains_key(broker)
    }

    /// Endpoint a partner exposes for one protocol. Missing brokers and
    /// missing protocol entries are both addressing failures.
    pub async fn endpoint_for(
        &self,
        broker: &BrokerId,
        protocol: FederationProtocol,
    ) -> FederationResult<String> {
        let brokers = self.brokers.read().await;
        let record = brokers.get(broker).ok_or_else(|| {
            FederationError::Validation(format!("broker {} is not registered", broker))
        })?;
        record.endpoints.get(&protocol).cloned().ok_or_else(|| {
            FederationError::Validation(format!(
                "broker {} has no {} endpoint",
                broker,
                protocol.as_str()
            ))
        })
    }

    pub async fn verifying_key_for(&self, broker: &BrokerId) -> Option<Vec<u8>> {
        let brokers = self.brokers.read().await;
        brokers.get(broker).and_then(|r| r.verifying_key.clone())
    }

    pub async fn list_brokers(&self) -> Vec<BrokerId> {
        self.brokers.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.brokers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.brokers.read().await.is_empty()
    }
}

impl Default for BrokerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
