//! Operation queue repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{EntityType, OperationId, OperationRecord, OperationStatus};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

const COLUMNS: &str = "id, entity_type, entity_id, kind, payload, status, retry_count, \
                       next_attempt_at, created_at, updated_at, last_error";

/// Per-status record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
}

/// Trait for operation queue storage
pub trait QueueRepository {
    /// Get a record by ID
    fn get(&self, id: &OperationId) -> Result<Option<OperationRecord>>;

    /// Find the unsent (pending or failed) record for an entity, if any
    fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<OperationRecord>>;

    /// Find the in-flight record for an entity, if any
    fn find_syncing_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<OperationRecord>>;

    /// Insert a new record
    fn insert(&self, record: &OperationRecord) -> Result<()>;

    /// Overwrite a record by ID; returns false when it no longer exists
    fn update(&self, record: &OperationRecord) -> Result<bool>;

    /// Delete a record; returns false when it was already gone
    fn delete(&self, id: &OperationId) -> Result<bool>;

    /// Delete a record only while it is in flight; returns false otherwise
    fn complete(&self, id: &OperationId) -> Result<bool>;

    /// Records due at `now_ms`, oldest first, skipping entities with a record in flight
    fn list_ready(&self, now_ms: i64, limit: usize) -> Result<Vec<OperationRecord>>;

    /// Atomically move a due record to `syncing`; false when it cannot be claimed
    fn claim(&self, id: &OperationId, now_ms: i64) -> Result<bool>;

    /// List records, optionally filtered by status, oldest first
    fn list(&self, status: Option<OperationStatus>, limit: usize) -> Result<Vec<OperationRecord>>;

    /// Count records per status
    fn status_counts(&self) -> Result<StatusCounts>;

    /// Creation time of the oldest pending record
    fn oldest_pending_created_at(&self) -> Result<Option<i64>>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<OperationRecord> {
        let id: String = row.get(0)?;
        let entity_type: String = row.get(1)?;
        let kind: String = row.get(3)?;
        let status: String = row.get(5)?;

        Ok(OperationRecord {
            id: id.parse().map_err(|error| conversion_error(0, error))?,
            entity_type: entity_type
                .parse()
                .map_err(|error| conversion_error(1, error))?,
            entity_id: row.get(2)?,
            kind: kind.parse().map_err(|error| conversion_error(3, error))?,
            payload: row.get(4)?,
            status: status.parse().map_err(|error| conversion_error(5, error))?,
            retry_count: row.get(6)?,
            next_attempt_at: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            last_error: row.get(10)?,
        })
    }

    fn query_one(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<OperationRecord>> {
        Ok(self
            .conn
            .query_row(sql, params, Self::parse_record)
            .optional()?)
    }

    fn query_many(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<OperationRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let records = stmt
            .query_map(params, Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

fn conversion_error(
    index: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn get(&self, id: &OperationId) -> Result<Option<OperationRecord>> {
        self.query_one(
            &format!("SELECT {COLUMNS} FROM sync_operations WHERE id = ?"),
            params![id.as_str()],
        )
    }

    fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<OperationRecord>> {
        self.query_one(
            &format!(
                "SELECT {COLUMNS} FROM sync_operations
                 WHERE entity_type = ? AND entity_id = ? AND status IN ('pending', 'failed')"
            ),
            params![entity_type.as_str(), entity_id],
        )
    }

    fn find_syncing_for_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<OperationRecord>> {
        self.query_one(
            &format!(
                "SELECT {COLUMNS} FROM sync_operations
                 WHERE entity_type = ? AND entity_id = ? AND status = 'syncing'
                 ORDER BY created_at ASC
                 LIMIT 1"
            ),
            params![entity_type.as_str(), entity_id],
        )
    }

    fn insert(&self, record: &OperationRecord) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO sync_operations ({COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                record.id.as_str(),
                record.entity_type.as_str(),
                record.entity_id,
                record.kind.as_str(),
                record.payload,
                record.status.as_str(),
                record.retry_count,
                record.next_attempt_at,
                record.created_at,
                record.updated_at,
                record.last_error,
            ],
        )?;
        Ok(())
    }

    fn update(&self, record: &OperationRecord) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_operations
             SET kind = ?, payload = ?, status = ?, retry_count = ?, next_attempt_at = ?,
                 updated_at = ?, last_error = ?
             WHERE id = ?",
            params![
                record.kind.as_str(),
                record.payload,
                record.status.as_str(),
                record.retry_count,
                record.next_attempt_at,
                record.updated_at,
                record.last_error,
                record.id.as_str(),
            ],
        )?;
        Ok(rows > 0)
    }

    fn delete(&self, id: &OperationId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM sync_operations WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn complete(&self, id: &OperationId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM sync_operations WHERE id = ? AND status = 'syncing'",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn list_ready(&self, now_ms: i64, limit: usize) -> Result<Vec<OperationRecord>> {
        self.query_many(
            &format!(
                "SELECT {COLUMNS} FROM sync_operations AS op
                 WHERE op.status IN ('pending', 'failed')
                   AND op.next_attempt_at IS NOT NULL
                   AND op.next_attempt_at <= ?
                   AND NOT EXISTS (
                       SELECT 1 FROM sync_operations AS other
                       WHERE other.entity_type = op.entity_type
                         AND other.entity_id = op.entity_id
                         AND other.status = 'syncing'
                   )
                 ORDER BY op.created_at ASC, op.id ASC
                 LIMIT ?"
            ),
            params![now_ms, limit as i64],
        )
    }

    fn claim(&self, id: &OperationId, now_ms: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_operations
             SET status = 'syncing', updated_at = ?1
             WHERE id = ?2
               AND status IN ('pending', 'failed')
               AND next_attempt_at IS NOT NULL
               AND next_attempt_at <= ?1
               AND NOT EXISTS (
                   SELECT 1 FROM sync_operations AS other
                   WHERE other.entity_type = sync_operations.entity_type
                     AND other.entity_id = sync_operations.entity_id
                     AND other.status = 'syncing'
               )",
            params![now_ms, id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn list(&self, status: Option<OperationStatus>, limit: usize) -> Result<Vec<OperationRecord>> {
        match status {
            Some(status) => self.query_many(
                &format!(
                    "SELECT {COLUMNS} FROM sync_operations
                     WHERE status = ?
                     ORDER BY created_at ASC, id ASC
                     LIMIT ?"
                ),
                params![status.as_str(), limit as i64],
            ),
            None => self.query_many(
                &format!(
                    "SELECT {COLUMNS} FROM sync_operations
                     ORDER BY created_at ASC, id ASC
                     LIMIT ?"
                ),
                params![limit as i64],
            ),
        }
    }

    fn status_counts(&self) -> Result<StatusCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM sync_operations GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = usize::try_from(count).unwrap_or(0);
            match status.parse::<OperationStatus>()? {
                OperationStatus::Pending => counts.pending = count,
                OperationStatus::Syncing => counts.syncing = count,
                OperationStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    fn oldest_pending_created_at(&self) -> Result<Option<i64>> {
        Ok(self.conn.query_row(
            "SELECT MIN(created_at) FROM sync_operations WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::merge::{merge, MergeDecision};
    use crate::models::{Intent, OperationKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn record(entity_id: &str, now_ms: i64) -> OperationRecord {
        let intent = Intent::update(EntityType::Player, entity_id, json!({"n": entity_id})).unwrap();
        match merge(None, &intent, now_ms) {
            MergeDecision::Insert(record) => record,
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn test_insert_and_get_roundtrip() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let mut original = record("p1", 10);
        original.last_error = Some("HTTP 503".to_string());
        repo.insert(&original).unwrap();

        let fetched = repo.get(&original.id).unwrap().unwrap();
        assert_eq!(fetched, original);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let original = record("p1", 10);
        repo.insert(&original).unwrap();

        assert!(repo.delete(&original.id).unwrap());
        assert!(!repo.delete(&original.id).unwrap());
        assert!(repo.get(&original.id).unwrap().is_none());
    }

    #[test]
    fn test_complete_only_removes_in_flight_records() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let original = record("p1", 10);
        repo.insert(&original).unwrap();

        assert!(!repo.complete(&original.id).unwrap());
        assert!(repo.get(&original.id).unwrap().is_some());

        assert!(repo.claim(&original.id, 20).unwrap());
        assert!(repo.complete(&original.id).unwrap());
        assert!(!repo.complete(&original.id).unwrap());
        assert!(repo.get(&original.id).unwrap().is_none());
    }

    #[test]
    fn test_list_ready_orders_oldest_first_and_respects_limit() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let newest = record("p3", 30);
        let oldest = record("p1", 10);
        let middle = record("p2", 20);
        for r in [&newest, &oldest, &middle] {
            repo.insert(r).unwrap();
        }

        let ready = repo.list_ready(100, 2).unwrap();
        let ids = ready.iter().map(|r| r.entity_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["p1", "p2"]);
    }

    #[test]
    fn test_list_ready_skips_backoff_and_terminal_records() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let mut backing_off = record("p1", 10);
        backing_off.next_attempt_at = Some(5_000);
        let mut terminal = record("p2", 10);
        terminal.status = OperationStatus::Failed;
        terminal.next_attempt_at = None;
        let due = record("p3", 10);
        for r in [&backing_off, &terminal, &due] {
            repo.insert(r).unwrap();
        }

        let ready = repo.list_ready(1_000, 10).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].entity_id, "p3");

        let later = repo.list_ready(5_000, 10).unwrap();
        assert_eq!(later.len(), 2);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let original = record("p1", 10);
        repo.insert(&original).unwrap();

        assert!(repo.claim(&original.id, 20).unwrap());
        assert!(!repo.claim(&original.id, 20).unwrap());

        let claimed = repo.get(&original.id).unwrap().unwrap();
        assert_eq!(claimed.status, OperationStatus::Syncing);
    }

    #[test]
    fn test_claim_refuses_second_in_flight_record_for_entity() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let first = record("p1", 10);
        repo.insert(&first).unwrap();
        assert!(repo.claim(&first.id, 20).unwrap());

        let second = record("p1", 30);
        repo.insert(&second).unwrap();

        assert!(repo.list_ready(100, 10).unwrap().is_empty());
        assert!(!repo.claim(&second.id, 100).unwrap());
        assert_eq!(
            repo.find_syncing_for_entity(EntityType::Player, "p1")
                .unwrap()
                .map(|r| r.id),
            Some(first.id)
        );
        assert_eq!(
            repo.find_by_entity(EntityType::Player, "p1")
                .unwrap()
                .map(|r| r.id),
            Some(second.id)
        );
    }

    #[test]
    fn test_status_counts_and_oldest_pending() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let a = record("p1", 10);
        let b = record("p2", 20);
        let mut c = record("p3", 5);
        c.status = OperationStatus::Failed;
        c.next_attempt_at = None;
        for r in [&a, &b, &c] {
            repo.insert(r).unwrap();
        }
        repo.claim(&b.id, 30).unwrap();

        assert_eq!(
            repo.status_counts().unwrap(),
            StatusCounts {
                pending: 1,
                syncing: 1,
                failed: 1,
            }
        );
        assert_eq!(repo.oldest_pending_created_at().unwrap(), Some(10));
        assert_eq!(repo.list(Some(OperationStatus::Failed), 10).unwrap().len(), 1);
        assert_eq!(repo.list(None, 10).unwrap().len(), 3);
    }

    #[test]
    fn test_update_persists_merge_fields() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());

        let mut original = record("p1", 10);
        repo.insert(&original).unwrap();

        original.kind = OperationKind::Delete;
        original.payload = None;
        original.updated_at = 50;
        assert!(repo.update(&original).unwrap());

        let fetched = repo.get(&original.id).unwrap().unwrap();
        assert_eq!(fetched.kind, OperationKind::Delete);
        assert_eq!(fetched.payload, None);
        assert_eq!(fetched.updated_at, 50);
    }
}
