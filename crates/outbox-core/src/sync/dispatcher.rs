//! Claims ready operations, sends them, and writes the classified result back.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::time::MissedTickBehavior;

use super::{Outcome, SyncEvent, Transport};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::models::{OperationId, OperationRecord};
use crate::services::{DispatchLease, QueueStore};
use crate::util::{compact_text, duration_to_millis, unix_millis_now};

const EVENT_CAPACITY: usize = 64;

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Records this tick moved to `syncing`
    pub claimed: usize,
    pub succeeded: usize,
    /// Transient failures rescheduled with backoff
    pub retried: usize,
    /// Records parked as terminally failed
    pub failed: usize,
    /// Ready records another tick claimed first
    pub skipped: usize,
    /// The remote store rejected our credentials and the batch stopped
    pub auth_halted: bool,
}

impl TickReport {
    pub const fn is_empty(&self) -> bool {
        self.claimed == 0 && self.skipped == 0 && !self.auth_halted
    }
}

/// Drains the queue into a [`Transport`].
///
/// Cheap to clone; clones share the store, transport, trigger, event channel
/// and dispatch lease, so a manual "sync now" and the background loop can run
/// side by side without sending anything twice. The lease is released when
/// the last clone is dropped.
pub struct Dispatcher<T> {
    store: QueueStore,
    transport: Arc<T>,
    config: SyncConfig,
    wake: Arc<Notify>,
    events: broadcast::Sender<SyncEvent>,
    /// Claims whose write-back and release both failed
    stranded: Arc<Mutex<Vec<OperationId>>>,
    lease: Arc<DispatchLease>,
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            transport: Arc::clone(&self.transport),
            config: self.config,
            wake: Arc::clone(&self.wake),
            events: self.events.clone(),
            stranded: Arc::clone(&self.stranded),
            lease: Arc::clone(&self.lease),
        }
    }
}

impl<T: Transport + Send + Sync> Dispatcher<T> {
    /// Take the queue's dispatch lease and build a dispatcher around it.
    ///
    /// Fails with [`crate::Error::Locked`] while another dispatcher holds the
    /// lease for the same queue.
    pub async fn new(store: QueueStore, transport: T, config: SyncConfig) -> Result<Self> {
        let lease = store.acquire_dispatch_lease().await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            store,
            transport: Arc::new(transport),
            config,
            wake: Arc::new(Notify::new()),
            events,
            stranded: Arc::new(Mutex::new(Vec::new())),
            lease: Arc::new(lease),
        })
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Receive [`SyncEvent`]s for every record this dispatcher settles.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Ask the running loop to tick now instead of waiting for the interval.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Send one batch of due operations.
    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_with(unix_millis_now).await
    }

    /// Send one batch as if the clock read `now_ms` throughout.
    pub async fn tick_at(&self, now_ms: i64) -> Result<TickReport> {
        self.tick_with(move || now_ms).await
    }

    async fn tick_with(&self, clock: impl Fn() -> i64 + Send + Sync) -> Result<TickReport> {
        self.release_stranded(clock()).await;

        let ready = self
            .store
            .list_ready(clock(), self.config.batch_size)
            .await?;
        let mut report = TickReport::default();

        for candidate in ready {
            let id = candidate.id;
            if !self.store.mark_syncing(&id, clock()).await? {
                report.skipped += 1;
                continue;
            }

            match self.dispatch_claimed(&id, &clock, &mut report).await {
                Ok(false) => {}
                Ok(true) => break,
                Err(error) => {
                    self.abandon_claim(&id, clock()).await;
                    return Err(error);
                }
            }
        }

        if !report.is_empty() {
            tracing::debug!("Sync tick finished: {report:?}");
        }
        Ok(report)
    }

    /// Send a claimed record and write the outcome back. Returns true when
    /// the rest of the batch must wait for re-authentication.
    async fn dispatch_claimed(
        &self,
        id: &OperationId,
        clock: &(impl Fn() -> i64 + Send + Sync),
        report: &mut TickReport,
    ) -> Result<bool> {
        // Merges may have rewritten the record between listing and claiming.
        let Some(record) = self.store.get(id).await? else {
            return Ok(false);
        };
        report.claimed += 1;

        let outcome = self.send(&record).await;
        let now_ms = clock();
        match outcome {
            Outcome::Success => {
                self.store.mark_completed(id).await?;
                tracing::debug!(
                    "Synced {} {}/{} ({id})",
                    record.kind,
                    record.entity_type,
                    record.entity_id
                );
                report.succeeded += 1;
                self.emit(SyncEvent::Synced { id: *id });
            }
            Outcome::TransientFailure(reason) => {
                if self.retry_later(&record, &reason, now_ms).await? {
                    report.retried += 1;
                } else {
                    report.failed += 1;
                }
            }
            Outcome::PermanentFailure(reason) => {
                self.park(&record, record.retry_count, &reason, now_ms)
                    .await?;
                report.failed += 1;
            }
            Outcome::AuthFailure => {
                self.store.release(id, now_ms).await?;
                tracing::warn!(
                    "Remote store rejected credentials; halting sync until re-authentication"
                );
                report.auth_halted = true;
                self.emit(SyncEvent::AuthRequired);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Hand a claim back after its write-back failed so the entity is not
    /// blocked. If even that fails, the next tick tries again.
    async fn abandon_claim(&self, id: &OperationId, now_ms: i64) {
        match self.store.release(id, now_ms).await {
            Ok(true) => {
                tracing::warn!("Returned operation {id} to pending after a failed write-back");
            }
            Ok(false) => {}
            Err(error) => {
                tracing::error!("Operation {id} is stuck in flight: {error}");
                self.stranded.lock().await.push(*id);
            }
        }
    }

    async fn release_stranded(&self, now_ms: i64) {
        let mut stranded = self.stranded.lock().await;
        let mut still_stranded = Vec::new();
        for id in std::mem::take(&mut *stranded) {
            match self.store.release(&id, now_ms).await {
                Ok(released) => {
                    if released {
                        tracing::info!("Returned stranded operation {id} to pending");
                    }
                }
                Err(error) => {
                    tracing::warn!("Operation {id} is still stuck in flight: {error}");
                    still_stranded.push(id);
                }
            }
        }
        *stranded = still_stranded;
    }

    async fn send(&self, record: &OperationRecord) -> Outcome {
        tokio::time::timeout(self.config.send_timeout, self.transport.send(record))
            .await
            .unwrap_or_else(|_| Outcome::transient("timeout"))
    }

    /// Reschedule after a transient failure. Returns false when the retry
    /// budget is spent and the record was parked instead.
    async fn retry_later(
        &self,
        record: &OperationRecord,
        reason: &str,
        now_ms: i64,
    ) -> Result<bool> {
        let retry_count = record.retry_count.saturating_add(1);
        let policy = &self.config.retry;
        if policy.is_exhausted(retry_count) {
            self.park(record, retry_count, reason, now_ms).await?;
            return Ok(false);
        }

        let next_attempt_at =
            now_ms.saturating_add(duration_to_millis(policy.delay(retry_count)));
        let reason = compact_text(reason);
        self.store
            .mark_failed_at(
                &record.id,
                retry_count,
                Some(next_attempt_at),
                &reason,
                now_ms,
            )
            .await?;
        tracing::warn!(
            "Sync of {} {}/{} failed (attempt {retry_count}/{}): {reason}",
            record.kind,
            record.entity_type,
            record.entity_id,
            policy.max_retries
        );
        self.emit(SyncEvent::RetryScheduled {
            id: record.id,
            retry_count,
            next_attempt_at,
            reason,
        });
        Ok(true)
    }

    async fn park(
        &self,
        record: &OperationRecord,
        retry_count: u32,
        reason: &str,
        now_ms: i64,
    ) -> Result<()> {
        let reason = compact_text(reason);
        self.store
            .mark_failed_at(&record.id, retry_count, None, &reason, now_ms)
            .await?;
        tracing::error!(
            "Giving up on {} {}/{} ({}) after {retry_count} retries: {reason}",
            record.kind,
            record.entity_type,
            record.entity_id,
            record.id
        );
        self.emit(SyncEvent::Failed {
            id: record.id,
            retry_count,
            reason,
        });
        Ok(())
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        self.events.send(event).ok();
    }

    /// Tick on every interval and on [`Self::trigger`] until `shutdown`
    /// flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            "Sync dispatcher started (every {:?}, batch {})",
            self.config.tick_interval,
            self.config.batch_size
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
                () = self.wake.notified() => {}
            }

            if let Err(error) = self.tick().await {
                tracing::error!("Sync tick failed: {error}");
            }
        }

        tracing::info!("Sync dispatcher stopped");
    }
}
