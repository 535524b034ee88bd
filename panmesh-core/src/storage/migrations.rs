//! Database migrations for the federation and shared-context schema
//!
//! Each migration applies atomically and is recorded in the
//! mesh_schema_version table. Context-scoped tables cascade on context
//! removal; credential bridges and federation hops cascade with their
//! owning relationship.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::info;

use super::{StorageError, StorageResult};
use crate::core_context::model::types::Timestamp;

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
    pub down_sql: Option<&'static str>,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial trust and shared-context schema",
        up_sql: r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS mesh_schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );

            -- Trust relationships, keyed by partner broker DID.
            -- Non-active rows are retained, never deleted.
            CREATE TABLE IF NOT EXISTS trust_relationships (
                id TEXT PRIMARY KEY,
                partner TEXT NOT NULL,
                level TEXT NOT NULL CHECK(level IN ('FullTrust', 'LimitedTrust', 'VerifyAlways')),
                status TEXT NOT NULL CHECK(status IN ('Active', 'Suspended', 'Revoked')),
                trust_domain TEXT,
                protocols TEXT NOT NULL,            -- JSON array of protocol names
                established_at INTEGER NOT NULL,
                expires_at INTEGER,
                revoked_at INTEGER,
                revocation_reason TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_trust_partner ON trust_relationships(partner);
            CREATE INDEX IF NOT EXISTS idx_trust_status ON trust_relationships(status);

            -- Credential bridges, owned by one relationship
            CREATE TABLE IF NOT EXISTS credential_bridges (
                id TEXT PRIMARY KEY,
                relationship_id TEXT NOT NULL,
                from_domain TEXT NOT NULL,
                to_domain TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                revoked BOOLEAN NOT NULL DEFAULT 0,
                FOREIGN KEY (relationship_id) REFERENCES trust_relationships(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_bridges_relationship ON credential_bridges(relationship_id);

            -- Federation hop audit trail, ordered per relationship
            CREATE TABLE IF NOT EXISTS federation_hops (
                relationship_id TEXT NOT NULL,
                broker TEXT NOT NULL,
                hop_number INTEGER NOT NULL,
                protocol TEXT NOT NULL CHECK(protocol IN ('HTTP', 'DIDComm', 'ActivityPub', 'LDN')),
                occurred_at INTEGER NOT NULL,
                FOREIGN KEY (relationship_id) REFERENCES trust_relationships(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_hops_relationship ON federation_hops(relationship_id);

            -- Shared contexts (aggregate metadata; graph in child tables)
            CREATE TABLE IF NOT EXISTS shared_contexts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                owner TEXT NOT NULL,
                visibility TEXT NOT NULL CHECK(visibility IN ('Private', 'Participants', 'Public')),
                sync_strategy TEXT NOT NULL CHECK(sync_strategy IN ('StateCrdt')),
                conflict_mode TEXT NOT NULL CHECK(conflict_mode IN ('Overwrite', 'VersionOrigin')),
                version INTEGER NOT NULL,
                vector_clock TEXT NOT NULL,         -- JSON object
                participants TEXT NOT NULL,         -- JSON array of broker DIDs
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_contexts_owner ON shared_contexts(owner);

            -- Graph nodes, unique per context
            CREATE TABLE IF NOT EXISTS context_nodes (
                context_id TEXT NOT NULL,
                id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                data TEXT NOT NULL,                 -- JSON
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                version INTEGER NOT NULL,
                PRIMARY KEY (context_id, id),
                FOREIGN KEY (context_id) REFERENCES shared_contexts(id) ON DELETE CASCADE
            );

            -- Graph edges; both endpoints must exist in the same context
            CREATE TABLE IF NOT EXISTS context_edges (
                context_id TEXT NOT NULL,
                id TEXT NOT NULL,
                from_node TEXT NOT NULL,
                to_node TEXT NOT NULL,
                edge_type TEXT NOT NULL,
                data TEXT,                          -- JSON, optional
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                version INTEGER NOT NULL,
                PRIMARY KEY (context_id, id),
                FOREIGN KEY (context_id) REFERENCES shared_contexts(id) ON DELETE CASCADE,
                FOREIGN KEY (context_id, from_node) REFERENCES context_nodes(context_id, id),
                FOREIGN KEY (context_id, to_node) REFERENCES context_nodes(context_id, id)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_from ON context_edges(context_id, from_node);
            CREATE INDEX IF NOT EXISTS idx_edges_to ON context_edges(context_id, to_node);

            -- Per-(context, broker) replica tracking
            CREATE TABLE IF NOT EXISTS context_replicas (
                context_id TEXT NOT NULL,
                broker TEXT NOT NULL,
                local_version INTEGER NOT NULL,
                observed_clock TEXT NOT NULL,       -- JSON object
                status TEXT NOT NULL CHECK(status IN ('Pending', 'Synced', 'Diverged')),
                last_sync_at INTEGER,
                PRIMARY KEY (context_id, broker),
                FOREIGN KEY (context_id) REFERENCES shared_contexts(id) ON DELETE CASCADE
            );

            -- Access grants per (context, broker)
            CREATE TABLE IF NOT EXISTS access_entries (
                context_id TEXT NOT NULL,
                broker TEXT NOT NULL,
                level TEXT NOT NULL CHECK(level IN ('Observe', 'Contribute', 'Admin')),
                granted_by TEXT NOT NULL,
                granted_at INTEGER NOT NULL,
                expires_at INTEGER,
                PRIMARY KEY (context_id, broker),
                FOREIGN KEY (context_id) REFERENCES shared_contexts(id) ON DELETE CASCADE
            );
        "#,
        down_sql: Some(
            r#"
            DROP TABLE IF EXISTS access_entries;
            DROP TABLE IF EXISTS context_replicas;

            DROP INDEX IF EXISTS idx_edges_to;
            DROP INDEX IF EXISTS idx_edges_from;
            DROP TABLE IF EXISTS context_edges;
            DROP TABLE IF EXISTS context_nodes;

            DROP INDEX IF EXISTS idx_contexts_owner;
            DROP TABLE IF EXISTS shared_contexts;

            DROP INDEX IF EXISTS idx_hops_relationship;
            DROP TABLE IF EXISTS federation_hops;

            DROP INDEX IF EXISTS idx_bridges_relationship;
            DROP TABLE IF EXISTS credential_bridges;

            DROP INDEX IF EXISTS idx_trust_status;
            DROP INDEX IF EXISTS idx_trust_partner;
            DROP TABLE IF EXISTS trust_relationships;

            DROP TABLE IF EXISTS mesh_schema_version;
        "#,
        ),
    }]
}

/// Get current schema version from the database
fn get_current_version(pool: &Pool<SqliteConnectionManager>) -> StorageResult<i32> {
    let conn = pool.get()?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mesh_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Result<i32, _> = conn.query_row(
        "SELECT version FROM mesh_schema_version ORDER BY version DESC LIMIT 1",
        [],
        |row| row.get(0),
    );

    Ok(version.unwrap_or(0))
}

/// Run all pending migrations
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> StorageResult<()> {
    let current_version = get_current_version(pool)?;
    let pending: Vec<_> = get_migrations()
        .into_iter()
        .filter(|m| m.version > current_version)
        .collect();

    if pending.is_empty() {
        return Ok(());
    }

    let conn = pool.get()?;

    for migration in pending {
        let tx = conn.unchecked_transaction()?;

        tx.execute_batch(migration.up_sql)?;
        tx.execute(
            "INSERT INTO mesh_schema_version (version, applied_at) VALUES (?, ?)",
            params![migration.version, Timestamp::now().as_millis() as i64],
        )?;

        tx.commit()?;

        info!(
            version = migration.version,
            description = migration.description,
            "applied schema migration"
        );
    }

    Ok(())
}

/// Latest migration version available in this build
pub fn get_latest_version() -> i32 {
    get_migrations().iter().map(|m| m.version).max().unwrap_or(0)
}

/// Verify a freshly opened database is at the expected version
pub fn check_version(pool: &Pool<SqliteConnectionManager>) -> StorageResult<()> {
    let current = get_current_version(pool)?;
    if current != CURRENT_SCHEMA_VERSION {
        return Err(StorageError::InvalidValue(format!(
            "schema version {} does not match expected {}",
            current, CURRENT_SCHEMA_VERSION
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_pool() -> Pool<SqliteConnectionManager> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
        Pool::builder().max_size(1).build(manager).unwrap()
    }

    #[test]
    fn test_initial_migration() {
        let pool = setup_test_pool();
        migrate(&pool).expect("migration failed");

        let conn = pool.get().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(tables.contains(&"trust_relationships".to_string()));
        assert!(tables.contains(&"credential_bridges".to_string()));
        assert!(tables.contains(&"federation_hops".to_string()));
        assert!(tables.contains(&"shared_contexts".to_string()));
        assert!(tables.contains(&"context_nodes".to_string()));
        assert!(tables.contains(&"context_edges".to_string()));
        assert!(tables.contains(&"context_replicas".to_string()));
        assert!(tables.contains(&"access_entries".to_string()));
    }

    #[test]
    fn test_migration_version_tracking() {
        let pool = setup_test_pool();
        migrate(&pool).expect("migration failed");

        let version = get_current_version(&pool).expect("failed to get version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
        check_version(&pool).expect("version check failed");
    }

    #[test]
    fn test_idempotent_migrations() {
        let pool = setup_test_pool();
        migrate(&pool).expect("first migration failed");
        migrate(&pool).expect("second migration failed");

        let version = get_current_version(&pool).expect("failed to get version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_context_cascade_delete() {
        let pool = setup_test_pool();
        migrate(&pool).expect("migration failed");

        let conn = pool.get().unwrap();
        let now = 1000i64;

        conn.execute(
            "INSERT INTO shared_contexts
             (id, name, owner, visibility, sync_strategy, conflict_mode, version, vector_clock, participants, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                "ctx-1",
                "Alpha",
                "did:web:a.example",
                "Participants",
                "StateCrdt",
                "VersionOrigin",
                1,
                r#"{"clock":{"did:web:a.example":1}}"#,
                r#"["did:web:a.example"]"#,
                now,
                now
            ],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO context_nodes (context_id, id, node_type, data, created_by, created_at, version)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params!["ctx-1", "n1", "task", "{}", "did:web:a.example", now, 1],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO context_replicas
             (context_id, broker, local_version, observed_clock, status, last_sync_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params!["ctx-1", "did:web:b.example", 1, "{\"clock\":{}}", "Pending", Option::<i64>::None],
        )
        .unwrap();

        conn.execute("DELETE FROM shared_contexts WHERE id = ?", params!["ctx-1"])
            .unwrap();

        let nodes: i32 = conn
            .query_row("SELECT COUNT(*) FROM context_nodes", [], |r| r.get(0))
            .unwrap();
        let replicas: i32 = conn
            .query_row("SELECT COUNT(*) FROM context_replicas", [], |r| r.get(0))
            .unwrap();
        assert_eq!(nodes, 0);
        assert_eq!(replicas, 0);
    }

    #[test]
    fn test_relationship_cascade_delete() {
        let pool = setup_test_pool();
        migrate(&pool).expect("migration failed");

        let conn = pool.get().unwrap();
        let now = 1000i64;

        conn.execute(
            "INSERT INTO trust_relationships
             (id, partner, level, status, protocols, established_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params!["rel-1", "did:web:b.example", "FullTrust", "Active", r#"["HTTP"]"#, now],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO credential_bridges (id, relationship_id, from_domain, to_domain, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params!["br-1", "rel-1", "dom-a", "dom-b", now],
        )
        .unwrap();

        conn.execute("DELETE FROM trust_relationships WHERE id = ?", params!["rel-1"])
            .unwrap();

        let bridges: i32 = conn
            .query_row("SELECT COUNT(*) FROM credential_bridges", [], |r| r.get(0))
            .unwrap();
        assert_eq!(bridges, 0);
    }
}
