/*
    trust_ledger.rs - Trust relationship ledger

    Keyed store of TrustRelationship by partner broker. Owns the
    relationship state machine:

        none --establish--> active --revoke | expiry sweep--> revoked

    Revoked is terminal. Non-active relationships are retained forever;
    revoking and re-establishing leaves both rows in the partner's
    history, newest last.

    Concurrency: one critical section per partner. The outer map is
    read-locked briefly to fetch the partner's slot; the slot mutex
    makes check-then-set atomic, so two racing establish calls for the
    same partner cannot both succeed. Partners are independent.
*/

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::core_context::model::types::{BrokerId, Timestamp};
use crate::core_federation::error::{FederationError, FederationResult};
use crate::core_federation::types::{
    FederationHop, RelationshipStatus, TrustRelationship,
};
use crate::storage::SqlStore;

#[derive(Debug, Default)]
struct PartnerHistory {
    /// All relationships ever held with this partner, oldest first.
    /// At most the last entry can be active.
    relationships: Vec<TrustRelationship>,
}

impl PartnerHistory {
    fn latest(&self) -> Option<&TrustRelationship> {
        self.relationships.last()
    }
}

/// Ledger of trust relationships for one local broker instance
pub struct TrustLedger {
    slots: RwLock<HashMap<BrokerId, Arc<Mutex<PartnerHistory>>>>,
    storage: Option<Arc<SqlStore>>,
}

impl TrustLedger {
    pub fn new() -> Self {
        TrustLedger {
            slots: RwLock::new(HashMap::new()),
            storage: None,
        }
    }

    pub fn with_storage(mut self, storage: Arc<SqlStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Reload every persisted relationship. Returns the number loaded.
    pub async fn hydrate(&self) -> FederationResult<usize> {
        let Some(storage) = &self.storage else {
            return Ok(0);
        };

        let mut relationships = storage.load_relationships()?;
        relationships.sort_by_key(|r| r.established_at);
        let loaded = relationships.len();

        let mut slots = self.slots.write().await;
        slots.clear();
        for relationship in relationships {
            let slot = slots.entry(relationship.partner.clone()).or_default().clone();
            slot.lock().await.relationships.push(relationship);
        }
        drop(slots);

        info!(relationships = loaded, "hydrated trust ledger");
        Ok(loaded)
    }

    /// Record a newly established relationship. Fails if an active one
    /// already exists for the partner; an expired-but-unswept entry is
    /// stamped revoked first so the single-active invariant holds.
    pub async fn establish(
        &self,
        relationship: TrustRelationship,
    ) -> FederationResult<TrustRelationship> {
        let slot = self.slot(&relationship.partner).await;
        let mut guard = slot.lock().await;
        let now = Timestamp::now();

        if let Some(latest) = guard.latest() {
            if latest.is_active(now) {
                return Err(FederationError::RelationshipExists(
                    relationship.partner.clone(),
                ));
            }
            if latest.status == RelationshipStatus::Active {
                // Status still says active, so the expiry sweep has not
                // caught it yet
                let idx = guard.relationships.len() - 1;
                let mut expired = latest.clone();
                Self::stamp_revoked(&mut expired, "expired", now);
                self.persist(&expired)?;
                guard.relationships[idx] = expired;
                debug!(partner = %relationship.partner, "expired stale relationship during establish");
            }
        }

        self.persist(&relationship)?;
        guard.relationships.push(relationship.clone());

        info!(
            partner = %relationship.partner,
            relationship_id = %relationship.id,
            level = relationship.level.as_str(),
            "established trust relationship"
        );
        metrics::counter!("panmesh_trust_established_total").increment(1);
        Ok(relationship)
    }

    /// Revoke the partner's current relationship. Terminal: a revoked
    /// relationship can never return to active.
    pub async fn revoke(
        &self,
        partner: &BrokerId,
        reason: &str,
        revoke_bridges: bool,
    ) -> FederationResult<TrustRelationship> {
        let slot = self.slot(partner).await;
        let mut guard = slot.lock().await;

        let Some(latest) = guard.latest() else {
            return Err(FederationError::RelationshipNotFound(partner.clone()));
        };
        if latest.status == RelationshipStatus::Revoked {
            return Err(FederationError::AlreadyRevoked(partner.clone()));
        }

        let idx = guard.relationships.len() - 1;
        let mut revoked = latest.clone();
        Self::stamp_revoked(&mut revoked, reason, Timestamp::now());
        if revoke_bridges {
            for bridge in &mut revoked.bridges {
                bridge.revoked = true;
            }
        }

        self.persist(&revoked)?;
        guard.relationships[idx] = revoked.clone();

        info!(
            partner = %partner,
            relationship_id = %revoked.id,
            reason = reason,
            bridges_revoked = revoke_bridges,
            "revoked trust relationship"
        );
        metrics::counter!("panmesh_trust_revoked_total").increment(1);
        Ok(revoked)
    }

    /// Flip every relationship whose expiry has passed to revoked.
    /// Returns the relationships the sweep transitioned.
    pub async fn sweep_expired(&self) -> FederationResult<Vec<TrustRelationship>> {
        let now = Timestamp::now();
        let slots: Vec<Arc<Mutex<PartnerHistory>>> = {
            let map = self.slots.read().await;
            map.values().cloned().collect()
        };

        let mut swept = Vec::new();
        for slot in slots {
            let mut guard = slot.lock().await;
            let Some(latest) = guard.latest() else {
                continue;
            };
            let expired = latest.status == RelationshipStatus::Active
                && latest.expires_at.map(|e| now >= e).unwrap_or(false);
            if !expired {
                continue;
            }

            let idx = guard.relationships.len() - 1;
            let mut revoked = latest.clone();
            Self::stamp_revoked(&mut revoked, "expired", now);
            self.persist(&revoked)?;
            guard.relationships[idx] = revoked.clone();

            warn!(
                partner = %revoked.partner,
                relationship_id = %revoked.id,
                "trust relationship expired"
            );
            swept.push(revoked);
        }

        if !swept.is_empty() {
            metrics::counter!("panmesh_trust_expired_total").increment(swept.len() as u64);
        }
        Ok(swept)
    }

    /// The partner's current relationship, if it is active right now
    pub async fn active(&self, partner: &BrokerId) -> Option<TrustRelationship> {
        let slot = self.try_slot(partner).await?;
        let guard = slot.lock().await;
        let latest = guard.latest()?;
        if latest.is_active(Timestamp::now()) {
            Some(latest.clone())
        } else {
            None
        }
    }

    /// Every relationship ever held with the partner, oldest first
    pub async fn history(&self, partner: &BrokerId) -> Vec<TrustRelationship> {
        match self.try_slot(partner).await {
            Some(slot) => slot.lock().await.relationships.clone(),
            None => Vec::new(),
        }
    }

    pub async fn all_active(&self) -> Vec<TrustRelationship> {
        let now = Timestamp::now();
        let slots: Vec<Arc<Mutex<PartnerHistory>>> = {
            let map = self.slots.read().await;
            map.values().cloned().collect()
        };

        let mut active = Vec::new();
        for slot in slots {
            let guard = slot.lock().await;
            if let Some(latest) = guard.latest() {
                if latest.is_active(now) {
                    active.push(latest.clone());
                }
            }
        }
        active
    }

    /// Append a hop to the active relationship's audit trail. Called by
    /// the router after a federation exchange actually went out.
    pub async fn record_hop(
        &self,
        partner: &BrokerId,
        hop: FederationHop,
    ) -> FederationResult<TrustRelationship> {
        let slot = self.slot(partner).await;
        let mut guard = slot.lock().await;

        let Some(latest) = guard.latest() else {
            return Err(FederationError::RelationshipNotFound(partner.clone()));
        };
        if !latest.is_active(Timestamp::now()) {
            return Err(FederationError::RelationshipInactive(partner.clone()));
        }

        let idx = guard.relationships.len() - 1;
        let mut updated = latest.clone();
        updated.hops.push(hop);

        self.persist(&updated)?;
        guard.relationships[idx] = updated.clone();

        Ok(updated)
    }

    pub async fn partner_count(&self) -> usize {
        self.slots.read().await.len()
    }

    fn stamp_revoked(relationship: &mut TrustRelationship, reason: &str, now: Timestamp) {
        relationship.status = RelationshipStatus::Revoked;
        relationship.revoked_at = Some(now);
        relationship.revocation_reason = Some(reason.to_string());
    }

    async fn slot(&self, partner: &BrokerId) -> Arc<Mutex<PartnerHistory>> {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(partner) {
                return slot.clone();
            }
        }
        let mut slots = self.slots.write().await;
        slots.entry(partner.clone()).or_default().clone()
    }

    async fn try_slot(&self, partner: &BrokerId) -> Option<Arc<Mutex<PartnerHistory>>> {
        self.slots.read().await.get(partner).cloned()
    }

    fn persist(&self, relationship: &TrustRelationship) -> FederationResult<()> {
        if let Some(storage) = &self.storage {
            storage.upsert_relationship(relationship)?;
        }
        Ok(())
    }
}

impl Default for TrustLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_federation::types::{
        CredentialBridge, FederationProtocol, RelationshipId, TrustLevel,
    };

    fn broker(id: &str) -> BrokerId {
        BrokerId::new(id.to_string())
    }

    fn relationship(partner: &str, level: TrustLevel) -> TrustRelationship {
        TrustRelationship {
            id: RelationshipId::generate(),
            partner: broker(partner),
            level,
            trust_domain: None,
            protocols: vec![FederationProtocol::Http],
            bridges: vec![CredentialBridge::new(
                "did:panmesh:self".to_string(),
                partner.to_string(),
            )],
            hops: Vec::new(),
            status: RelationshipStatus::Active,
            established_at: Timestamp::now(),
            expires_at: None,
            revoked_at: None,
            revocation_reason: None,
        }
    }

    #[tokio::test]
    async fn establish_then_duplicate_fails() {
        let ledger = TrustLedger::new();
        let partner = broker("did:panmesh:b");

        ledger
            .establish(relationship("did:panmesh:b", TrustLevel::FullTrust))
            .await
            .unwrap();
        assert!(ledger.active(&partner).await.is_some());

        let err = ledger
            .establish(relationship("did:panmesh:b", TrustLevel::LimitedTrust))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn revoke_is_terminal() {
        let ledger = TrustLedger::new();
        let partner = broker("did:panmesh:b");

        ledger
            .establish(relationship("did:panmesh:b", TrustLevel::FullTrust))
            .await
            .unwrap();
        let revoked = ledger.revoke(&partner, "policy change", false).await.unwrap();
        assert_eq!(revoked.status, RelationshipStatus::Revoked);
        assert_eq!(revoked.revocation_reason.as_deref(), Some("policy change"));
        assert!(revoked.revoked_at.is_some());
        assert!(ledger.active(&partner).await.is_none());

        let err = ledger.revoke(&partner, "again", false).await.unwrap_err();
        assert!(err.to_string().contains("already revoked"));
    }

    #[tokio::test]
    async fn revoke_unknown_partner_fails() {
        let ledger = TrustLedger::new();
        let err = ledger
            .revoke(&broker("did:panmesh:ghost"), "unused", false)
            .await
            .unwrap_err();
        assert!(matches!(err, FederationError::RelationshipNotFound(_)));
    }

    #[tokio::test]
    async fn reestablish_after_revoke_keeps_history() {
        let ledger = TrustLedger::new();
        let partner = broker("did:panmesh:b");

        ledger
            .establish(relationship("did:panmesh:b", TrustLevel::FullTrust))
            .await
            .unwrap();
        ledger.revoke(&partner, "rotation", false).await.unwrap();
        ledger
            .establish(relationship("did:panmesh:b", TrustLevel::LimitedTrust))
            .await
            .unwrap();

        let history = ledger.history(&partner).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, RelationshipStatus::Revoked);
        assert_eq!(history[1].status, RelationshipStatus::Active);
        assert_eq!(history[1].level, TrustLevel::LimitedTrust);
    }

    #[tokio::test]
    async fn revoking_bridges_marks_them() {
        let ledger = TrustLedger::new();
        let partner = broker("did:panmesh:b");

        ledger
            .establish(relationship("did:panmesh:b", TrustLevel::FullTrust))
            .await
            .unwrap();
        let revoked = ledger.revoke(&partner, "compromise", true).await.unwrap();
        assert!(revoked.bridges.iter().all(|b| b.revoked));
    }

    #[tokio::test]
    async fn sweep_expires_overdue_relationships() {
        let ledger = TrustLedger::new();
        let partner = broker("did:panmesh:b");

        let mut rel = relationship("did:panmesh:b", TrustLevel::LimitedTrust);
        rel.expires_at = Some(Timestamp::from_millis(Timestamp::now().as_millis() - 1_000));
        // Insert directly: establish() refuses already-expired input paths
        let slot = ledger.slot(&partner).await;
        slot.lock().await.relationships.push(rel);

        let swept = ledger.sweep_expired().await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].revocation_reason.as_deref(), Some("expired"));
        assert!(ledger.active(&partner).await.is_none());

        // Sweep is idempotent
        assert!(ledger.sweep_expired().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn establish_over_expired_entry_succeeds() {
        let ledger = TrustLedger::new();
        let partner = broker("did:panmesh:b");

        let mut stale = relationship("did:panmesh:b", TrustLevel::FullTrust);
        stale.expires_at = Some(Timestamp::from_millis(Timestamp::now().as_millis() - 1_000));
        let slot = ledger.slot(&partner).await;
        slot.lock().await.relationships.push(stale);

        ledger
            .establish(relationship("did:panmesh:b", TrustLevel::VerifyAlways))
            .await
            .unwrap();

        let history = ledger.history(&partner).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, RelationshipStatus::Revoked);
        assert_eq!(history[0].revocation_reason.as_deref(), Some("expired"));
        assert!(ledger.active(&partner).await.is_some());
    }

    #[tokio::test]
    async fn record_hop_requires_active_relationship() {
        let ledger = TrustLedger::new();
        let partner = broker("did:panmesh:b");
        let hop = FederationHop {
            broker: partner.clone(),
            hop_number: 1,
            protocol: FederationProtocol::Http,
            occurred_at: Timestamp::now(),
        };

        let err = ledger.record_hop(&partner, hop.clone()).await.unwrap_err();
        assert!(matches!(err, FederationError::RelationshipNotFound(_)));

        ledger
            .establish(relationship("did:panmesh:b", TrustLevel::FullTrust))
            .await
            .unwrap();
        let updated = ledger.record_hop(&partner, hop).await.unwrap();
        assert_eq!(updated.hops.len(), 1);
        assert_eq!(updated.hops[0].hop_number, 1);

        ledger.revoke(&partner, "done", false).await.unwrap();
        let hop2 = FederationHop {
            broker: partner.clone(),
            hop_number: 2,
            protocol: FederationProtocol::Http,
            occurred_at: Timestamp::now(),
        };
        let err = ledger.record_hop(&partner, hop2).await.unwrap_err();
        assert!(matches!(err, FederationError::RelationshipInactive(_)));
    }

    #[tokio::test]
    async fn ledger_persists_and_hydrates() {
        let storage = Arc::new(SqlStore::memory().unwrap());
        let partner = broker("did:panmesh:b");

        {
            let ledger = TrustLedger::new().with_storage(storage.clone());
            ledger
                .establish(relationship("did:panmesh:b", TrustLevel::FullTrust))
                .await
                .unwrap();
            ledger.revoke(&partner, "rotate", false).await.unwrap();
            ledger
                .establish(relationship("did:panmesh:b", TrustLevel::LimitedTrust))
                .await
                .unwrap();
        }

        let revived = TrustLedger::new().with_storage(storage);
        assert_eq!(revived.hydrate().await.unwrap(), 2);

        let history = revived.history(&partner).await;
        assert_eq!(history.len(), 2);
        let active = revived.active(&partner).await.unwrap();
        assert_eq!(active.level, TrustLevel::LimitedTrust);
    }
}
