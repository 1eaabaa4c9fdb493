//! Database migrations
//!
//! The schema version doubles as the persisted record format version:
//! records must survive restarts, so every change here is additive or
//! migrated explicitly.

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
pub fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: operation queue
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN TRANSACTION;

        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS sync_operations (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('create', 'update', 'delete')),
            payload TEXT,
            status TEXT NOT NULL CHECK (status IN ('pending', 'syncing', 'failed')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            next_attempt_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            CHECK (kind != 'delete' OR payload IS NULL)
        );

        CREATE INDEX IF NOT EXISTS idx_sync_operations_entity
            ON sync_operations(entity_type, entity_id);
        CREATE INDEX IF NOT EXISTS idx_sync_operations_ready
            ON sync_operations(status, next_attempt_at, created_at);

        -- At most one unsent record per entity; in-flight records are exempt.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_operations_unsent_entity
            ON sync_operations(entity_type, entity_id)
            WHERE status IN ('pending', 'failed');

        INSERT INTO schema_version (version) VALUES (1);

        COMMIT;",
    )
    .inspect_err(|_| {
        conn.execute_batch("ROLLBACK").ok();
    })?;

    tracing::info!("Migrated queue database to version 1");
    Ok(())
}

/// Migration to version 2: failure reason for operator inspection
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN TRANSACTION;
        ALTER TABLE sync_operations ADD COLUMN last_error TEXT;
        INSERT INTO schema_version (version) VALUES (2);
        COMMIT;",
    )
    .inspect_err(|_| {
        conn.execute_batch("ROLLBACK").ok();
    })?;

    tracing::info!("Migrated queue database to version {CURRENT_VERSION}");
    Ok(())
}
