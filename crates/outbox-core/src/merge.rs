//! Merge engine
//!
//! Decides how an incoming mutation intent combines with the queued record
//! already waiting for the same entity. Pure logic: no storage, no clock.
//!
//! | existing | incoming        | result                              |
//! |----------|-----------------|-------------------------------------|
//! | none     | any             | insert                              |
//! | create   | create/update   | replace, stays `create`             |
//! | create   | delete          | cancel both                         |
//! | update   | create/update   | replace, stays `update`             |
//! | update   | delete          | replace, becomes `delete`           |
//! | delete   | create/update   | replace, becomes `update`           |
//! | delete   | delete          | replace, stays `delete`             |
//!
//! A queued delete always targets an entity the remote knows about, since a
//! create followed by a delete cancels before anything is sent. Re-creating
//! it before the delete goes out therefore nets out to an overwrite.

use crate::models::{Intent, OperationId, OperationKind, OperationRecord, OperationStatus};

/// Outcome of merging an intent against the queued state for its entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// Store a brand-new record
    Insert(OperationRecord),
    /// Overwrite the existing record with this one (same id)
    Replace(OperationRecord),
    /// Remove the existing record and store nothing
    Cancel(OperationId),
}

/// Merge `incoming` into `existing` at time `now_ms`.
///
/// Records in `syncing` are never merged against; they produce an insert.
pub fn merge(existing: Option<&OperationRecord>, incoming: &Intent, now_ms: i64) -> MergeDecision {
    let Some(existing) = existing.filter(|record| record.status.is_mergeable()) else {
        return MergeDecision::Insert(new_record(incoming, now_ms));
    };

    let Some(kind) = merged_kind(existing.kind, incoming.kind) else {
        return MergeDecision::Cancel(existing.id);
    };

    MergeDecision::Replace(replace_with(existing, kind, incoming.payload.clone(), now_ms))
}

/// Fold a later unsent record into an earlier one for the same entity.
///
/// Used when an in-flight record settles back into the queue while a newer
/// record for its entity is already waiting. Returns `None` when the two
/// cancel out.
pub fn fold(
    existing: &OperationRecord,
    later: &OperationRecord,
    now_ms: i64,
) -> Option<OperationRecord> {
    merged_kind(existing.kind, later.kind)
        .map(|kind| replace_with(existing, kind, later.payload.clone(), now_ms))
}

/// Resulting kind of `existing` followed by `incoming`; `None` means cancel.
pub const fn merged_kind(existing: OperationKind, incoming: OperationKind) -> Option<OperationKind> {
    match (existing, incoming) {
        (OperationKind::Create, OperationKind::Delete) => None,
        (OperationKind::Create, _) => Some(OperationKind::Create),
        (OperationKind::Update, OperationKind::Delete)
        | (OperationKind::Delete, OperationKind::Delete) => Some(OperationKind::Delete),
        (OperationKind::Update | OperationKind::Delete, _) => Some(OperationKind::Update),
    }
}

fn replace_with(
    existing: &OperationRecord,
    kind: OperationKind,
    payload: Option<serde_json::Value>,
    now_ms: i64,
) -> OperationRecord {
    let mut replaced = existing.clone();
    replaced.kind = kind;
    replaced.payload = match kind {
        OperationKind::Delete => None,
        OperationKind::Create | OperationKind::Update => payload,
    };
    replaced.updated_at = now_ms;

    // Touching a terminally failed record is the explicit re-enqueue: fresh budget.
    if existing.status == OperationStatus::Failed {
        replaced.status = OperationStatus::Pending;
        replaced.retry_count = 0;
        replaced.next_attempt_at = Some(now_ms);
        replaced.last_error = None;
    }

    replaced
}

fn new_record(intent: &Intent, now_ms: i64) -> OperationRecord {
    OperationRecord {
        id: OperationId::new(),
        entity_type: intent.entity_type,
        entity_id: intent.entity_id.clone(),
        kind: intent.kind,
        payload: match intent.kind {
            OperationKind::Delete => None,
            OperationKind::Create | OperationKind::Update => intent.payload.clone(),
        },
        status: OperationStatus::Pending,
        retry_count: 0,
        next_attempt_at: Some(now_ms),
        created_at: now_ms,
        updated_at: now_ms,
        last_error: None,
    }
}
