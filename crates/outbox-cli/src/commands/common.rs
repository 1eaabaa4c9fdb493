use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use outbox_core::config::storage_from_env;
use outbox_core::{
    Dispatcher, Enqueued, HttpTransport, OperationRecord, QueueStatus, QueueStore, RemoteConfig,
    SyncConfig,
};
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct OperationListItem {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub kind: String,
    pub status: String,
    pub retry_count: u32,
    pub next_attempt_at: Option<i64>,
    pub created_at: i64,
    pub age: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueStatusItem {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    pub oldest_pending_age_ms: Option<u64>,
}

pub fn record_to_list_item(record: &OperationRecord, now_ms: i64) -> OperationListItem {
    OperationListItem {
        id: record.id.to_string(),
        entity_type: record.entity_type.to_string(),
        entity_id: record.entity_id.clone(),
        kind: record.kind.to_string(),
        status: record.status.to_string(),
        retry_count: record.retry_count,
        next_attempt_at: record.next_attempt_at,
        created_at: record.created_at,
        age: format_relative_time(record.created_at, now_ms),
        last_error: record.last_error.clone(),
    }
}

pub fn status_to_item(status: &QueueStatus) -> QueueStatusItem {
    QueueStatusItem {
        pending: status.pending_count,
        syncing: status.syncing_count,
        failed: status.failed_count,
        oldest_pending_age_ms: status
            .oldest_pending_age
            .map(|age| u64::try_from(age.as_millis()).unwrap_or(u64::MAX)),
    }
}

pub fn format_record_lines(records: &[OperationRecord], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let mut line = format!(
                "{}  {:<7} {:<6} {}/{}  {}",
                record.id,
                record.status,
                record.kind,
                record.entity_type,
                record.entity_id,
                format_relative_time(record.created_at, now_ms)
            );
            if record.retry_count > 0 {
                line.push_str(&format!("  retries={}", record.retry_count));
            }
            if let Some(next_attempt_at) = record
                .next_attempt_at
                .filter(|next_attempt_at| *next_attempt_at > now_ms)
            {
                line.push_str(&format!("  next={}", format_timestamp(next_attempt_at)));
            }
            if let Some(error) = &record.last_error {
                line.push_str(&format!("  error=\"{error}\""));
            }
            line
        })
        .collect()
}

pub fn format_status_lines(status: &QueueStatus) -> Vec<String> {
    let oldest = status
        .oldest_pending_age
        .map_or_else(|| "-".to_string(), format_age);
    vec![
        format!("pending: {}", status.pending_count),
        format!("syncing: {}", status.syncing_count),
        format!("failed:  {}", status.failed_count),
        format!("oldest pending: {oldest}"),
    ]
}

pub fn describe_enqueued(enqueued: Enqueued) -> String {
    match enqueued {
        Enqueued::Inserted(id) => format!("queued {id}"),
        Enqueued::Replaced(id) => format!("merged into {id}"),
        Enqueued::Cancelled(id) => format!("cancelled {id}"),
    }
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = u64::try_from(now_ms.saturating_sub(timestamp_ms)).unwrap_or(0);
    format!("{} ago", format_age(Duration::from_millis(diff)))
}

pub fn format_age(age: Duration) -> String {
    let seconds = age.as_secs();
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3_600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h", seconds / 3_600)
    } else {
        format!("{}d", seconds / 86_400)
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map_or_else(|| timestamp_ms.to_string(), |time| time.to_rfc3339())
}

pub fn parse_payload(payload: Option<&str>) -> Result<Option<serde_json::Value>, CliError> {
    payload
        .map(|raw| {
            serde_json::from_str(raw).map_err(|error| CliError::InvalidPayload(error.to_string()))
        })
        .transpose()
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("OUTBOX_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("outbox")
        .join("queue.db")
}

pub fn open_store(path: &Path) -> Result<QueueStore, CliError> {
    let storage = storage_from_env()?;
    Ok(QueueStore::open(path, &storage)?)
}

pub async fn open_dispatcher(path: &Path) -> Result<Dispatcher<HttpTransport>, CliError> {
    let remote = RemoteConfig::from_env()?.ok_or(CliError::RemoteNotConfigured)?;
    let config = SyncConfig::from_env()?;
    let store = open_store(path)?;
    let transport = HttpTransport::new(remote)?;
    Ok(Dispatcher::new(store, transport, config).await?)
}
