//! SQL-backed storage for trust relationships and shared contexts
//!
//! Full-image persistence: each upsert rewrites the aggregate's rows
//! inside one transaction, so the tables always show the latest state
//! of every aggregate this broker holds. Loading rebuilds the in-memory
//! aggregates on startup.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

use super::{migrations, StorageError, StorageResult};
use crate::core_context::crdt::vector_clock::VectorClock;
use crate::core_context::model::context::SharedContext;
use crate::core_context::model::entity::{ContextEdge, ContextNode};
use crate::core_context::model::types::{
    AccessEntry, AccessLevel, BrokerId, ConflictMode, ContextId, EntityId, SyncStrategy,
    Timestamp, Visibility,
};
use crate::core_context::sync::replica::{ContextReplica, SyncStatus};
use crate::core_federation::types::{
    BridgeId, CredentialBridge, FederationHop, FederationProtocol, RelationshipId,
    RelationshipStatus, TrustLevel, TrustRelationship,
};

/// SQLite-backed store behind a connection pool
pub struct SqlStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqlStore {
    /// Wrap an existing pool, running any pending migrations
    pub fn new(pool: Pool<SqliteConnectionManager>) -> StorageResult<Self> {
        migrations::migrate(&pool)?;
        Ok(SqlStore { pool })
    }

    /// Open or create a database file
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().build(manager)?;
        Self::new(pool)
    }

    /// In-memory database. Pool capped at one connection so every
    /// handle sees the same database.
    pub fn memory() -> StorageResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(1).build(manager)?;
        Self::new(pool)
    }

    // ===== Trust relationships =====

    /// Write a relationship and its bridges/hops as one transaction
    pub fn upsert_relationship(&self, rel: &TrustRelationship) -> StorageResult<()> {
        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;

        let protocols: Vec<&str> = rel.protocols.iter().map(|p| p.as_str()).collect();

        tx.execute(
            "INSERT INTO trust_relationships
             (id, partner, level, status, trust_domain, protocols, established_at, expires_at, revoked_at, revocation_reason)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 partner = excluded.partner,
                 level = excluded.level,
                 status = excluded.status,
                 trust_domain = excluded.trust_domain,
                 protocols = excluded.protocols,
                 expires_at = excluded.expires_at,
                 revoked_at = excluded.revoked_at,
                 revocation_reason = excluded.revocation_reason",
            params![
                rel.id.0,
                rel.partner.as_str(),
                rel.level.as_str(),
                rel.status.as_str(),
                rel.trust_domain,
                serde_json::to_string(&protocols)?,
                rel.established_at.as_millis() as i64,
                rel.expires_at.map(|t| t.as_millis() as i64),
                rel.revoked_at.map(|t| t.as_millis() as i64),
                rel.revocation_reason,
            ],
        )?;

        // Full child refresh keeps bridge/hop rows exactly in sync
        tx.execute(
            "DELETE FROM credential_bridges WHERE relationship_id = ?",
            params![rel.id.0],
        )?;
        for bridge in &rel.bridges {
            tx.execute(
                "INSERT INTO credential_bridges (id, relationship_id, from_domain, to_domain, created_at, revoked)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    bridge.id.0,
                    rel.id.0,
                    bridge.from_domain,
                    bridge.to_domain,
                    bridge.created_at.as_millis() as i64,
                    bridge.revoked,
                ],
            )?;
        }

        tx.execute(
            "DELETE FROM federation_hops WHERE relationship_id = ?",
            params![rel.id.0],
        )?;
        for hop in &rel.hops {
            tx.execute(
                "INSERT INTO federation_hops (relationship_id, broker, hop_number, protocol, occurred_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    rel.id.0,
                    hop.broker.as_str(),
                    hop.hop_number,
                    hop.protocol.as_str(),
                    hop.occurred_at.as_millis() as i64,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Load every relationship with its bridges and hops, in
    /// established order
    pub fn load_relationships(&self) -> StorageResult<Vec<TrustRelationship>> {
        let conn = self.pool.get()?;

        struct RawRel {
            id: String,
            partner: String,
            level: String,
            status: String,
            trust_domain: Option<String>,
            protocols: String,
            established_at: i64,
            expires_at: Option<i64>,
            revoked_at: Option<i64>,
            revocation_reason: Option<String>,
        }

        let mut stmt = conn.prepare(
            "SELECT id, partner, level, status, trust_domain, protocols,
                    established_at, expires_at, revoked_at, revocation_reason
             FROM trust_relationships ORDER BY established_at, id",
        )?;
        let raw: Vec<RawRel> = stmt
            .query_map([], |row| {
                Ok(RawRel {
                    id: row.get(0)?,
                    partner: row.get(1)?,
                    level: row.get(2)?,
                    status: row.get(3)?,
                    trust_domain: row.get(4)?,
                    protocols: row.get(5)?,
                    established_at: row.get(6)?,
                    expires_at: row.get(7)?,
                    revoked_at: row.get(8)?,
                    revocation_reason: row.get(9)?,
                })
            })?
            .collect::<Result<_, _>>()?;

        let mut relationships = Vec::with_capacity(raw.len());
        for r in raw {
            let protocol_names: Vec<String> = serde_json::from_str(&r.protocols)?;
            let mut protocols = Vec::with_capacity(protocol_names.len());
            for name in &protocol_names {
                protocols.push(parse_protocol(name)?);
            }

            relationships.push(TrustRelationship {
                bridges: self.load_bridges(&conn, &r.id)?,
                hops: self.load_hops(&conn, &r.id)?,
                id: RelationshipId::new(r.id),
                partner: BrokerId::new(r.partner),
                level: parse_level(&r.level)?,
                trust_domain: r.trust_domain,
                protocols,
                status: parse_status(&r.status)?,
                established_at: millis(r.established_at),
                expires_at: r.expires_at.map(millis),
                revoked_at: r.revoked_at.map(millis),
                revocation_reason: r.revocation_reason,
            });
        }

        Ok(relationships)
    }

    fn load_bridges(
        &self,
        conn: &r2d2::PooledConnection<SqliteConnectionManager>,
        relationship_id: &str,
    ) -> StorageResult<Vec<CredentialBridge>> {
        let mut stmt = conn.prepare(
            "SELECT id, from_domain, to_domain, created_at, revoked
             FROM credential_bridges WHERE relationship_id = ? ORDER BY rowid",
        )?;
        let bridges = stmt
            .query_map(params![relationship_id], |row| {
                Ok(CredentialBridge {
                    id: BridgeId::new(row.get(0)?),
                    from_domain: row.get(1)?,
                    to_domain: row.get(2)?,
                    created_at: millis(row.get(3)?),
                    revoked: row.get(4)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(bridges)
    }

    fn load_hops(
        &self,
        conn: &r2d2::PooledConnection<SqliteConnectionManager>,
        relationship_id: &str,
    ) -> StorageResult<Vec<FederationHop>> {
        let mut stmt = conn.prepare(
            "SELECT broker, hop_number, protocol, occurred_at
             FROM federation_hops WHERE relationship_id = ? ORDER BY rowid",
        )?;
        let raw: Vec<(String, u32, String, i64)> = stmt
            .query_map(params![relationship_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<_, _>>()?;

        let mut hops = Vec::with_capacity(raw.len());
        for (broker, hop_number, protocol, occurred_at) in raw {
            hops.push(FederationHop {
                broker: BrokerId::new(broker),
                hop_number,
                protocol: parse_protocol(&protocol)?,
                occurred_at: millis(occurred_at),
            });
        }
        Ok(hops)
    }

    // ===== Shared contexts =====

    /// Write a context's metadata and full graph as one transaction
    pub fn upsert_context(&self, context: &SharedContext) -> StorageResult<()> {
        let conn = self.pool.get()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO shared_contexts
             (id, name, description, owner, visibility, sync_strategy, conflict_mode,
              version, vector_clock, participants, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 owner = excluded.owner,
                 visibility = excluded.visibility,
                 sync_strategy = excluded.sync_strategy,
                 conflict_mode = excluded.conflict_mode,
                 version = excluded.version,
                 vector_clock = excluded.vector_clock,
                 participants = excluded.participants,
                 updated_at = excluded.updated_at",
            params![
                context.id.0,
                context.name,
                context.description,
                context.owner.as_str(),
                visibility_str(context.visibility),
                strategy_str(context.sync_strategy),
                conflict_str(context.conflict_mode),
                context.version as i64,
                serde_json::to_string(&context.vector_clock)?,
                serde_json::to_string(&context.participants)?,
                context.created_at.as_millis() as i64,
                context.updated_at.as_millis() as i64,
            ],
        )?;

        // Graph refresh: edges first so node FKs stay satisfied
        tx.execute("DELETE FROM context_edges WHERE context_id = ?", params![context.id.0])?;
        tx.execute("DELETE FROM context_nodes WHERE context_id = ?", params![context.id.0])?;

        for node in context.nodes.values() {
            tx.execute(
                "INSERT INTO context_nodes (context_id, id, node_type, data, created_by, created_at, version)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    context.id.0,
                    node.id.0,
                    node.node_type,
                    serde_json::to_string(&node.data)?,
                    node.created_by.as_str(),
                    node.created_at.as_millis() as i64,
                    node.version as i64,
                ],
            )?;
        }

        for edge in context.edges.values() {
            let data = match &edge.data {
                Some(value) => Some(serde_json::to_string(value)?),
                None => None,
            };
            tx.execute(
                "INSERT INTO context_edges
                 (context_id, id, from_node, to_node, edge_type, data, created_by, created_at, version)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    context.id.0,
                    edge.id.0,
                    edge.from.0,
                    edge.to.0,
                    edge.edge_type,
                    data,
                    edge.created_by.as_str(),
                    edge.created_at.as_millis() as i64,
                    edge.version as i64,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Load one context with its full graph
    pub fn load_context(&self, context_id: &ContextId) -> StorageResult<Option<SharedContext>> {
        let conn = self.pool.get()?;

        let raw: Option<(
            String,
            Option<String>,
            String,
            String,
            String,
            String,
            i64,
            String,
            String,
            i64,
            i64,
        )> = conn
            .query_row(
                "SELECT name, description, owner, visibility, sync_strategy, conflict_mode,
                        version, vector_clock, participants, created_at, updated_at
                 FROM shared_contexts WHERE id = ?",
                params![context_id.0],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                        row.get(10)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            name,
            description,
            owner,
            visibility,
            strategy,
            conflict,
            version,
            clock_json,
            participants_json,
            created_at,
            updated_at,
        )) = raw
        else {
            return Ok(None);
        };

        let vector_clock: VectorClock = serde_json::from_str(&clock_json)?;
        let participants: Vec<BrokerId> = serde_json::from_str(&participants_json)?;

        let mut context = SharedContext {
            id: context_id.clone(),
            name,
            description,
            owner: BrokerId::new(owner),
            participants,
            visibility: parse_visibility(&visibility)?,
            sync_strategy: parse_strategy(&strategy)?,
            conflict_mode: parse_conflict(&conflict)?,
            version: version.max(0) as u64,
            vector_clock,
            nodes: HashMap::new(),
            edges: HashMap::new(),
            created_at: millis(created_at),
            updated_at: millis(updated_at),
        };

        let mut stmt = conn.prepare(
            "SELECT id, node_type, data, created_by, created_at, version
             FROM context_nodes WHERE context_id = ?",
        )?;
        let raw_nodes: Vec<(String, String, String, String, i64, i64)> = stmt
            .query_map(params![context_id.0], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        for (id, node_type, data, created_by, created_at, version) in raw_nodes {
            let node = ContextNode {
                id: EntityId::new(id),
                node_type,
                data: serde_json::from_str(&data)?,
                created_by: BrokerId::new(created_by),
                created_at: millis(created_at),
                version: version.max(0) as u64,
            };
            context.nodes.insert(node.id.clone(), node);
        }

        let mut stmt = conn.prepare(
            "SELECT id, from_node, to_node, edge_type, data, created_by, created_at, version
             FROM context_edges WHERE context_id = ?",
        )?;
        let raw_edges: Vec<(String, String, String, String, Option<String>, String, i64, i64)> =
            stmt.query_map(params![context_id.0], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        for (id, from, to, edge_type, data, created_by, created_at, version) in raw_edges {
            let data = match data {
                Some(text) => Some(serde_json::from_str(&text)?),
                None => None,
            };
            let edge = ContextEdge {
                id: EntityId::new(id),
                from: EntityId::new(from),
                to: EntityId::new(to),
                edge_type,
                data,
                created_by: BrokerId::new(created_by),
                created_at: millis(created_at),
                version: version.max(0) as u64,
            };
            context.edges.insert(edge.id.clone(), edge);
        }

        Ok(Some(context))
    }

    /// Ids of every stored context
    pub fn list_context_ids(&self) -> StorageResult<Vec<ContextId>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id FROM shared_contexts ORDER BY created_at")?;
        let ids = stmt
            .query_map([], |row| Ok(ContextId::new(row.get(0)?)))?
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    /// Remove a context; child tables cascade
    pub fn delete_context(&self, context_id: &ContextId) -> StorageResult<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM shared_contexts WHERE id = ?", params![context_id.0])?;
        Ok(())
    }

    // ===== Replicas =====

    pub fn upsert_replica(&self, replica: &ContextReplica) -> StorageResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO context_replicas
             (context_id, broker, local_version, observed_clock, status, last_sync_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(context_id, broker) DO UPDATE SET
                 local_version = excluded.local_version,
                 observed_clock = excluded.observed_clock,
                 status = excluded.status,
                 last_sync_at = excluded.last_sync_at",
            params![
                replica.context_id.0,
                replica.broker.as_str(),
                replica.local_version as i64,
                serde_json::to_string(&replica.observed_clock)?,
                sync_status_str(replica.status),
                replica.last_sync_at.map(|t| t.as_millis() as i64),
            ],
        )?;
        Ok(())
    }

    pub fn load_replicas(&self, context_id: &ContextId) -> StorageResult<Vec<ContextReplica>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT broker, local_version, observed_clock, status, last_sync_at
             FROM context_replicas WHERE context_id = ?",
        )?;
        let raw: Vec<(String, i64, String, String, Option<i64>)> = stmt
            .query_map(params![context_id.0], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        let mut replicas = Vec::with_capacity(raw.len());
        for (broker, local_version, clock_json, status, last_sync_at) in raw {
            replicas.push(ContextReplica {
                context_id: context_id.clone(),
                broker: BrokerId::new(broker),
                local_version: local_version.max(0) as u64,
                observed_clock: serde_json::from_str(&clock_json)?,
                status: parse_sync_status(&status)?,
                last_sync_at: last_sync_at.map(millis),
            });
        }
        Ok(replicas)
    }

    // ===== Access entries =====

    pub fn upsert_access(&self, entry: &AccessEntry) -> StorageResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO access_entries
             (context_id, broker, level, granted_by, granted_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(context_id, broker) DO UPDATE SET
                 level = excluded.level,
                 granted_by = excluded.granted_by,
                 granted_at = excluded.granted_at,
                 expires_at = excluded.expires_at",
            params![
                entry.context_id.0,
                entry.broker.as_str(),
                access_level_str(entry.level),
                entry.granted_by.as_str(),
                entry.granted_at.as_millis() as i64,
                entry.expires_at.map(|t| t.as_millis() as i64),
            ],
        )?;
        Ok(())
    }

    pub fn load_access_entries(&self, context_id: &ContextId) -> StorageResult<Vec<AccessEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT broker, level, granted_by, granted_at, expires_at
             FROM access_entries WHERE context_id = ?",
        )?;
        let raw: Vec<(String, String, String, i64, Option<i64>)> = stmt
            .query_map(params![context_id.0], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        let mut entries = Vec::with_capacity(raw.len());
        for (broker, level, granted_by, granted_at, expires_at) in raw {
            entries.push(AccessEntry {
                context_id: context_id.clone(),
                broker: BrokerId::new(broker),
                level: parse_access_level(&level)?,
                granted_by: BrokerId::new(granted_by),
                granted_at: millis(granted_at),
                expires_at: expires_at.map(millis),
            });
        }
        Ok(entries)
    }

    pub fn delete_access(&self, context_id: &ContextId, broker: &BrokerId) -> StorageResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM access_entries WHERE context_id = ? AND broker = ?",
            params![context_id.0, broker.as_str()],
        )?;
        Ok(())
    }
}

fn millis(value: i64) -> Timestamp {
    Timestamp::from_millis(value.max(0) as u64)
}

fn parse_level(s: &str) -> StorageResult<TrustLevel> {
    match s {
        "FullTrust" => Ok(TrustLevel::FullTrust),
        "LimitedTrust" => Ok(TrustLevel::LimitedTrust),
        "VerifyAlways" => Ok(TrustLevel::VerifyAlways),
        other => Err(StorageError::InvalidValue(format!("trust level: {}", other))),
    }
}

fn parse_status(s: &str) -> StorageResult<RelationshipStatus> {
    match s {
        "Active" => Ok(RelationshipStatus::Active),
        "Suspended" => Ok(RelationshipStatus::Suspended),
        "Revoked" => Ok(RelationshipStatus::Revoked),
        other => Err(StorageError::InvalidValue(format!("relationship status: {}", other))),
    }
}

fn parse_protocol(s: &str) -> StorageResult<FederationProtocol> {
    s.parse()
        .map_err(|_| StorageError::InvalidValue(format!("protocol: {}", s)))
}

fn visibility_str(v: Visibility) -> &'static str {
    match v {
        Visibility::Private => "Private",
        Visibility::Participants => "Participants",
        Visibility::Public => "Public",
    }
}

fn parse_visibility(s: &str) -> StorageResult<Visibility> {
    match s {
        "Private" => Ok(Visibility::Private),
        "Participants" => Ok(Visibility::Participants),
        "Public" => Ok(Visibility::Public),
        other => Err(StorageError::InvalidValue(format!("visibility: {}", other))),
    }
}

fn strategy_str(s: SyncStrategy) -> &'static str {
    match s {
        SyncStrategy::StateCrdt => "StateCrdt",
    }
}

fn parse_strategy(s: &str) -> StorageResult<SyncStrategy> {
    match s {
        "StateCrdt" => Ok(SyncStrategy::StateCrdt),
        other => Err(StorageError::InvalidValue(format!("sync strategy: {}", other))),
    }
}

fn conflict_str(c: ConflictMode) -> &'static str {
    match c {
        ConflictMode::Overwrite => "Overwrite",
        ConflictMode::VersionOrigin => "VersionOrigin",
    }
}

fn parse_conflict(s: &str) -> StorageResult<ConflictMode> {
    match s {
        "Overwrite" => Ok(ConflictMode::Overwrite),
        "VersionOrigin" => Ok(ConflictMode::VersionOrigin),
        other => Err(StorageError::InvalidValue(format!("conflict mode: {}", other))),
    }
}

fn sync_status_str(s: SyncStatus) -> &'static str {
    match s {
        SyncStatus::Pending => "Pending",
        SyncStatus::Synced => "Synced",
        SyncStatus::Diverged => "Diverged",
    }
}

fn parse_sync_status(s: &str) -> StorageResult<SyncStatus> {
    match s {
        "Pending" => Ok(SyncStatus::Pending),
        "Synced" => Ok(SyncStatus::Synced),
        "Diverged" => Ok(SyncStatus::Diverged),
        other => Err(StorageError::InvalidValue(format!("sync status: {}", other))),
    }
}

fn access_level_str(level: AccessLevel) -> &'static str {
    match level {
        AccessLevel::Observe => "Observe",
        AccessLevel::Contribute => "Contribute",
        AccessLevel::Admin => "Admin",
    }
}

fn parse_access_level(s: &str) -> StorageResult<AccessLevel> {
    match s {
        "Observe" => Ok(AccessLevel::Observe),
        "Contribute" => Ok(AccessLevel::Contribute),
        "Admin" => Ok(AccessLevel::Admin),
        other => Err(StorageError::InvalidValue(format!("access level: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broker(s: &str) -> BrokerId {
        BrokerId::from(s)
    }

    fn sample_relationship(partner: &str) -> TrustRelationship {
        TrustRelationship {
            id: RelationshipId::generate(),
            partner: broker(partner),
            level: TrustLevel::LimitedTrust,
            trust_domain: Some("mesh-domain".to_string()),
            protocols: vec![FederationProtocol::Http, FederationProtocol::DidComm],
            bridges: vec![CredentialBridge::new(
                "did:web:a.example".to_string(),
                partner.to_string(),
            )],
            hops: Vec::new(),
            status: RelationshipStatus::Active,
            established_at: Timestamp::from_millis(1_000),
            expires_at: None,
            revoked_at: None,
            revocation_reason: None,
        }
    }

    #[test]
    fn test_relationship_round_trip() {
        let store = SqlStore::memory().unwrap();
        let mut rel = sample_relationship("did:web:b.example");
        rel.hops.push(FederationHop {
            broker: broker("did:web:b.example"),
            hop_number: 1,
            protocol: FederationProtocol::Http,
            occurred_at: Timestamp::from_millis(2_000),
        });

        store.upsert_relationship(&rel).unwrap();

        let loaded = store.load_relationships().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], rel);
    }

    #[test]
    fn test_relationship_update_preserves_children() {
        let store = SqlStore::memory().unwrap();
        let mut rel = sample_relationship("did:web:b.example");
        store.upsert_relationship(&rel).unwrap();

        rel.status = RelationshipStatus::Revoked;
        rel.revoked_at = Some(Timestamp::from_millis(5_000));
        rel.revocation_reason = Some("partner compromised".to_string());
        store.upsert_relationship(&rel).unwrap();

        let loaded = store.load_relationships().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, RelationshipStatus::Revoked);
        assert_eq!(loaded[0].bridges.len(), 1);
        assert_eq!(
            loaded[0].revocation_reason.as_deref(),
            Some("partner compromised")
        );
    }

    #[test]
    fn test_two_relationships_same_partner_both_retained() {
        let store = SqlStore::memory().unwrap();

        let mut old = sample_relationship("did:web:b.example");
        old.status = RelationshipStatus::Revoked;
        let new = sample_relationship("did:web:b.example");

        store.upsert_relationship(&old).unwrap();
        store.upsert_relationship(&new).unwrap();

        let loaded = store.load_relationships().unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_context_round_trip_with_graph() {
        let store = SqlStore::memory().unwrap();
        let a = broker("did:web:a.example");

        let mut context = SharedContext::new("Alpha".to_string(), a.clone());
        context.description = Some("shared planning graph".to_string());
        context.add_participant(broker("did:web:b.example"));

        let n1 = ContextNode::new("task".to_string(), json!({"title": "one"}), a.clone());
        let n2 = ContextNode::new("task".to_string(), json!({"title": "two"}), a.clone());
        let edge = ContextEdge::new(
            n1.id.clone(),
            n2.id.clone(),
            "depends-on".to_string(),
            Some(json!({"weight": 2})),
            a.clone(),
        );
        context.insert_node(n1);
        context.insert_node(n2);
        context.insert_edge(edge);

        store.upsert_context(&context).unwrap();

        let loaded = store.load_context(&context.id).unwrap().unwrap();
        assert_eq!(loaded, context);
    }

    #[test]
    fn test_context_upsert_refreshes_graph() {
        let store = SqlStore::memory().unwrap();
        let a = broker("did:web:a.example");

        let mut context = SharedContext::new("Alpha".to_string(), a.clone());
        let node = ContextNode::new("task".to_string(), json!({"v": 1}), a.clone());
        let node_id = node.id.clone();
        context.insert_node(node);
        store.upsert_context(&context).unwrap();

        context.update_node(&node_id, json!({"v": 2}));
        context.start_sync_round(&a);
        store.upsert_context(&context).unwrap();

        let loaded = store.load_context(&context.id).unwrap().unwrap();
        assert_eq!(loaded.nodes[&node_id].data, json!({"v": 2}));
        assert_eq!(loaded.nodes[&node_id].version, 2);
        assert_eq!(loaded.version, context.version);
    }

    #[test]
    fn test_missing_context_loads_none() {
        let store = SqlStore::memory().unwrap();
        let missing = store.load_context(&ContextId::generate()).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_delete_context_cascades_replicas_and_access() {
        let store = SqlStore::memory().unwrap();
        let a = broker("did:web:a.example");
        let b = broker("did:web:b.example");

        let context = SharedContext::new("Alpha".to_string(), a.clone());
        store.upsert_context(&context).unwrap();

        store
            .upsert_replica(&ContextReplica {
                context_id: context.id.clone(),
                broker: b.clone(),
                local_version: 1,
                observed_clock: context.vector_clock.clone(),
                status: SyncStatus::Synced,
                last_sync_at: Some(Timestamp::from_millis(1_000)),
            })
            .unwrap();
        store
            .upsert_access(&AccessEntry {
                context_id: context.id.clone(),
                broker: b.clone(),
                level: AccessLevel::Observe,
                granted_by: a,
                granted_at: Timestamp::from_millis(1_000),
                expires_at: None,
            })
            .unwrap();

        store.delete_context(&context.id).unwrap();

        assert!(store.load_replicas(&context.id).unwrap().is_empty());
        assert!(store.load_access_entries(&context.id).unwrap().is_empty());
    }

    #[test]
    fn test_replica_upsert_overwrites() {
        let store = SqlStore::memory().unwrap();
        let a = broker("did:web:a.example");
        let b = broker("did:web:b.example");

        let context = SharedContext::new("Alpha".to_string(), a);
        store.upsert_context(&context).unwrap();

        let mut replica = ContextReplica {
            context_id: context.id.clone(),
            broker: b,
            local_version: 1,
            observed_clock: VectorClock::new(),
            status: SyncStatus::Pending,
            last_sync_at: None,
        };
        store.upsert_replica(&replica).unwrap();

        replica.local_version = 2;
        replica.status = SyncStatus::Synced;
        replica.last_sync_at = Some(Timestamp::from_millis(9_000));
        store.upsert_replica(&replica).unwrap();

        let loaded = store.load_replicas(&context.id).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], replica);
    }

    #[test]
    fn test_access_revocation_deletes_row() {
        let store = SqlStore::memory().unwrap();
        let a = broker("did:web:a.example");
        let b = broker("did:web:b.example");

        let context = SharedContext::new("Alpha".to_string(), a.clone());
        store.upsert_context(&context).unwrap();

        store
            .upsert_access(&AccessEntry {
                context_id: context.id.clone(),
                broker: b.clone(),
                level: AccessLevel::Contribute,
                granted_by: a,
                granted_at: Timestamp::from_millis(1_000),
                expires_at: None,
            })
            .unwrap();
        assert_eq!(store.load_access_entries(&context.id).unwrap().len(), 1);

        store.delete_access(&context.id, &b).unwrap();
        assert!(store.load_access_entries(&context.id).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_stored_enum_is_rejected() {
        let store = SqlStore::memory().unwrap();
        let rel = sample_relationship("did:web:b.example");
        store.upsert_relationship(&rel).unwrap();

        {
            let conn = store.pool.get().unwrap();
            conn.execute(
                "UPDATE trust_relationships SET level = 'FullTrust', protocols = '[\"Telegraph\"]'",
                [],
            )
            .unwrap();
        }

        let result = store.load_relationships();
        assert!(matches!(result, Err(StorageError::InvalidValue(_))));
    }
}
