//! Shared queue store service used by application code and the dispatcher.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use rusqlite::TransactionBehavior;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::{Database, QueueRepository, SqliteQueueRepository, StorageConfig};
use crate::error::{Error, Result};
use crate::merge::{fold, merge, MergeDecision};
use crate::models::{
    EntityType, Intent, OperationId, OperationRecord, OperationStatus, QueueStatus,
};
use crate::util::unix_millis_now;

/// How an enqueue call changed the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "id", rename_all = "lowercase")]
pub enum Enqueued {
    /// A new record was stored
    Inserted(OperationId),
    /// The waiting record for the entity absorbed the intent
    Replaced(OperationId),
    /// The waiting record was removed and nothing was stored
    Cancelled(OperationId),
}

impl Enqueued {
    /// The record ID this enqueue touched
    pub const fn id(&self) -> OperationId {
        match self {
            Self::Inserted(id) | Self::Replaced(id) | Self::Cancelled(id) => *id,
        }
    }
}

/// Exclusive right to claim and settle records in one queue.
///
/// At most one lease exists per queue file across processes (an OS file
/// lock) and per in-memory store across clones. Dropping it releases both.
#[derive(Debug)]
pub struct DispatchLease {
    lock_file: Option<File>,
    held: Arc<AtomicBool>,
}

impl Drop for DispatchLease {
    fn drop(&mut self) {
        // Closing the file releases the OS lock before the flag reopens.
        drop(self.lock_file.take());
        self.held.store(false, Ordering::Release);
    }
}

/// Thread-safe handle to the durable operation queue.
///
/// Construct one per process or session and hand clones to application code
/// and the dispatcher. Every mutation runs in a single `IMMEDIATE`
/// transaction under the lock, so read-modify-write sequences on one entity
/// never interleave. Several processes may enqueue into the same file, but
/// only the holder of the [`DispatchLease`] recovers and sends records.
#[derive(Clone)]
pub struct QueueStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    dispatching: Arc<AtomicBool>,
}

impl QueueStore {
    /// Open a queue store at the given filesystem path.
    ///
    /// Opening never touches records in flight; see
    /// [`QueueStore::acquire_dispatch_lease`].
    pub fn open(db_path: impl Into<PathBuf>, config: &StorageConfig) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::open_with_config(&db_path, config)?;
        tracing::info!("Opened operation queue at {}", db_path.display());

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            dispatching: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Open an in-memory queue store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
            dispatching: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Filesystem location of the queue, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn location(&self) -> String {
        self.db_path
            .as_ref()
            .map_or_else(|| ":memory:".to_string(), |path| path.display().to_string())
    }

    /// Become the only dispatcher for this queue.
    ///
    /// Records left in `syncing` can only belong to a dispatcher that no
    /// longer runs, so they are returned to `pending` here. Fails with
    /// [`Error::Locked`] while another lease is held.
    pub async fn acquire_dispatch_lease(&self) -> Result<DispatchLease> {
        self.acquire_dispatch_lease_at(unix_millis_now()).await
    }

    /// Acquire the dispatch lease as of `now_ms`.
    pub async fn acquire_dispatch_lease_at(&self, now_ms: i64) -> Result<DispatchLease> {
        if self.dispatching.swap(true, Ordering::AcqRel) {
            return Err(Error::Locked(self.location()));
        }
        let mut lease = DispatchLease {
            lock_file: None,
            held: Arc::clone(&self.dispatching),
        };
        if let Some(db_path) = &self.db_path {
            lease.lock_file = Some(lock_dispatch_file(db_path)?);
        }

        let recovered = {
            let mut db = self.db.lock().await;
            recover_interrupted(&mut db, now_ms)?
        };
        if recovered > 0 {
            tracing::warn!(
                "Returned {recovered} interrupted operation(s) to pending at {}",
                self.location()
            );
        }
        tracing::debug!("Acquired dispatch lease for {}", self.location());
        Ok(lease)
    }

    /// Queue a mutation for the remote store.
    ///
    /// The caller must already have written the local copy. Returns
    /// [`Error::QuotaExceeded`] when local storage is full; the queue is
    /// left unchanged in that case.
    pub async fn enqueue(&self, intent: Intent) -> Result<Enqueued> {
        self.enqueue_at(intent, unix_millis_now()).await
    }

    /// Queue a mutation as of `now_ms`.
    pub async fn enqueue_at(&self, intent: Intent, now_ms: i64) -> Result<Enqueued> {
        // Fields are public, so literals and deserialized intents skip `Intent::new`.
        let intent = Intent::new(
            intent.entity_type,
            intent.entity_id,
            intent.kind,
            intent.payload,
        )?;

        let mut db = self.db.lock().await;
        let tx = db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let enqueued = apply_intent(&SqliteQueueRepository::new(&tx), &intent, now_ms)?;
        tx.commit()?;

        tracing::debug!(
            "Enqueued {} {}/{}: {:?}",
            intent.kind,
            intent.entity_type,
            intent.entity_id,
            enqueued
        );
        Ok(enqueued)
    }

    /// Records due at `now_ms`, oldest first, at most `limit`.
    pub async fn list_ready(&self, now_ms: i64, limit: usize) -> Result<Vec<OperationRecord>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).list_ready(now_ms, limit)
    }

    /// Claim a due record for sending. Returns false when another caller
    /// already claimed it, it was merged away, it is not yet due, or another
    /// record for the same entity is in flight.
    pub async fn mark_syncing(&self, id: &OperationId, now_ms: i64) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).claim(id, now_ms)
    }

    /// Remove a record confirmed by the remote store.
    ///
    /// Only an in-flight record is removed; a record that is gone or was
    /// returned to `pending` is left alone. Returns whether it was removed.
    pub async fn mark_completed(&self, id: &OperationId) -> Result<bool> {
        let db = self.db.lock().await;
        let completed = SqliteQueueRepository::new(db.connection()).complete(id)?;
        if !completed {
            tracing::debug!("Operation {id} is no longer in flight; completion ignored");
        }
        Ok(completed)
    }

    /// Record a failed attempt for an in-flight record.
    ///
    /// With `next_attempt_at` set, the record returns to `pending` and waits
    /// until then. With `None`, it becomes terminally `failed` and stays
    /// until retried or discarded. Returns false when the record is not in
    /// flight.
    pub async fn mark_failed(
        &self,
        id: &OperationId,
        retry_count: u32,
        next_attempt_at: Option<i64>,
        reason: &str,
    ) -> Result<bool> {
        self.mark_failed_at(id, retry_count, next_attempt_at, reason, unix_millis_now())
            .await
    }

    /// Record a failed attempt as of `now_ms`.
    pub async fn mark_failed_at(
        &self,
        id: &OperationId,
        retry_count: u32,
        next_attempt_at: Option<i64>,
        reason: &str,
        now_ms: i64,
    ) -> Result<bool> {
        let status = if next_attempt_at.is_some() {
            OperationStatus::Pending
        } else {
            OperationStatus::Failed
        };
        self.settle(id, now_ms, |record| {
            record.status = status;
            record.retry_count = retry_count;
            record.next_attempt_at = next_attempt_at;
            record.last_error = Some(reason.to_string());
        })
        .await
    }

    /// Return an in-flight record to `pending` without touching its retry
    /// budget (the attempt was not the operation's fault).
    pub async fn release(&self, id: &OperationId, now_ms: i64) -> Result<bool> {
        self.settle(id, now_ms, |record| {
            record.status = OperationStatus::Pending;
            record.next_attempt_at = Some(now_ms);
        })
        .await
    }

    async fn settle(
        &self,
        id: &OperationId,
        now_ms: i64,
        apply: impl FnOnce(&mut OperationRecord),
    ) -> Result<bool> {
        let mut db = self.db.lock().await;
        let tx = db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let settled = settle_in_flight(&SqliteQueueRepository::new(&tx), id, now_ms, apply)?;
        tx.commit()?;
        Ok(settled)
    }

    /// Find the unsent record queued for an entity.
    pub async fn find_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<OperationRecord>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).find_by_entity(entity_type, entity_id)
    }

    /// Fetch a record by id.
    pub async fn get(&self, id: &OperationId) -> Result<Option<OperationRecord>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).get(id)
    }

    /// List records, optionally filtered by status, oldest first.
    pub async fn list(
        &self,
        status: Option<OperationStatus>,
        limit: usize,
    ) -> Result<Vec<OperationRecord>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).list(status, limit)
    }

    /// Summarize the queue for UI and observability.
    pub async fn queue_status(&self) -> Result<QueueStatus> {
        self.queue_status_at(unix_millis_now()).await
    }

    /// Summarize the queue as of `now_ms`.
    pub async fn queue_status_at(&self, now_ms: i64) -> Result<QueueStatus> {
        let db = self.db.lock().await;
        let repo = SqliteQueueRepository::new(db.connection());
        let counts = repo.status_counts()?;
        let oldest_pending_age = repo.oldest_pending_created_at()?.map(|created_at| {
            let age_ms = u64::try_from(now_ms.saturating_sub(created_at)).unwrap_or(0);
            Duration::from_millis(age_ms)
        });

        Ok(QueueStatus {
            pending_count: counts.pending,
            syncing_count: counts.syncing,
            failed_count: counts.failed,
            oldest_pending_age,
        })
    }

    /// Re-enqueue a terminally failed record with a fresh retry budget.
    pub async fn retry(&self, id: &OperationId) -> Result<Enqueued> {
        self.retry_at(id, unix_millis_now()).await
    }

    /// Re-enqueue a terminally failed record as of `now_ms`.
    pub async fn retry_at(&self, id: &OperationId, now_ms: i64) -> Result<Enqueued> {
        let mut db = self.db.lock().await;
        let tx = db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let repo = SqliteQueueRepository::new(&tx);

        let record = failed_record(&repo, id)?;
        let intent = Intent {
            entity_type: record.entity_type,
            entity_id: record.entity_id,
            kind: record.kind,
            payload: record.payload,
        };
        let enqueued = apply_intent(&repo, &intent, now_ms)?;
        tx.commit()?;

        tracing::info!("Retrying failed operation {id}");
        Ok(enqueued)
    }

    /// Drop a terminally failed record without sending it.
    pub async fn discard(&self, id: &OperationId) -> Result<OperationRecord> {
        let mut db = self.db.lock().await;
        let tx = db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let repo = SqliteQueueRepository::new(&tx);

        let record = failed_record(&repo, id)?;
        repo.delete(&record.id)?;
        tx.commit()?;

        tracing::warn!(
            "Discarded failed {} {}/{} ({})",
            record.kind,
            record.entity_type,
            record.entity_id,
            record.id
        );
        Ok(record)
    }

    /// Current database size in pages.
    pub async fn page_count(&self) -> Result<i64> {
        let db = self.db.lock().await;
        db.page_count()
    }

    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute_batch(sql)?;
        Ok(())
    }

    /// Cap local storage at `max_pages`; returns the effective limit.
    pub async fn set_max_pages(&self, max_pages: u32) -> Result<i64> {
        let db = self.db.lock().await;
        db.set_max_pages(max_pages)
    }
}

fn lock_dispatch_file(db_path: &Path) -> Result<File> {
    let mut lock_path = db_path.as_os_str().to_owned();
    lock_path.push(".dispatch.lock");

    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| Error::Locked(db_path.display().to_string()))?;
    Ok(lock_file)
}

/// Merge an intent into the entity's waiting record, if any.
fn apply_intent(
    repo: &SqliteQueueRepository<'_>,
    intent: &Intent,
    now_ms: i64,
) -> Result<Enqueued> {
    let existing = repo.find_by_entity(intent.entity_type, &intent.entity_id)?;
    let enqueued = match merge(existing.as_ref(), intent, now_ms) {
        MergeDecision::Insert(record) => {
            repo.insert(&record)?;
            Enqueued::Inserted(record.id)
        }
        MergeDecision::Replace(record) => {
            repo.update(&record)?;
            Enqueued::Replaced(record.id)
        }
        MergeDecision::Cancel(id) => {
            repo.delete(&id)?;
            Enqueued::Cancelled(id)
        }
    };
    Ok(enqueued)
}

/// Fetch a record that may be retried or discarded.
fn failed_record(repo: &SqliteQueueRepository<'_>, id: &OperationId) -> Result<OperationRecord> {
    let record = repo
        .get(id)?
        .ok_or_else(|| Error::NotFound(id.to_string()))?;
    if record.status != OperationStatus::Failed {
        return Err(Error::InvalidInput(format!(
            "operation {id} is {}, only failed operations can be retried or discarded",
            record.status
        )));
    }
    Ok(record)
}

/// Write back a settled in-flight record, folding in any newer record that
/// was queued for the same entity while it was in flight.
fn settle_in_flight(
    repo: &SqliteQueueRepository<'_>,
    id: &OperationId,
    now_ms: i64,
    apply: impl FnOnce(&mut OperationRecord),
) -> Result<bool> {
    let Some(mut record) = repo.get(id)? else {
        return Ok(false);
    };
    if record.status != OperationStatus::Syncing {
        tracing::warn!("Operation {id} is {}, not in flight; ignoring", record.status);
        return Ok(false);
    }

    apply(&mut record);
    record.updated_at = now_ms;

    let Some(later) = repo.find_by_entity(record.entity_type, &record.entity_id)? else {
        repo.update(&record)?;
        return Ok(true);
    };

    // Drop the newer record first so the unsent-per-entity index never sees two.
    repo.delete(&later.id)?;
    match fold(&record, &later, now_ms) {
        Some(folded) => {
            repo.update(&folded)?;
            tracing::debug!("Folded operation {} into {}", later.id, folded.id);
        }
        None => {
            repo.delete(&record.id)?;
            tracing::debug!(
                "Operations {} and {} cancelled each other out",
                record.id,
                later.id
            );
        }
    }
    Ok(true)
}

fn recover_interrupted(db: &mut Database, now_ms: i64) -> Result<usize> {
    let tx = db
        .connection_mut()
        .transaction_with_behavior(TransactionBehavior::Immediate)?;
    let repo = SqliteQueueRepository::new(&tx);

    let mut recovered = 0;
    for record in repo.list(Some(OperationStatus::Syncing), usize::MAX)? {
        let released = settle_in_flight(&repo, &record.id, now_ms, |record| {
            record.status = OperationStatus::Pending;
            record.next_attempt_at = Some(now_ms);
        })?;
        if released {
            recovered += 1;
        }
    }
    tx.commit()?;
    Ok(recovered)
}
