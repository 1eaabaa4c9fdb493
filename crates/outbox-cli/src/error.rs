use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] outbox_core::Error),
    #[error(transparent)]
    Config(#[from] outbox_core::ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Payload is not valid JSON: {0}")]
    InvalidPayload(String),
    #[error("Local storage is full; the operation was not queued. Sync or discard operations to free space.")]
    QuotaExceeded,
    #[error("Remote store is not configured. Set OUTBOX_REMOTE_URL (and OUTBOX_REMOTE_TOKEN if required).")]
    RemoteNotConfigured,
    #[error("Remote store rejected the credentials. Refresh OUTBOX_REMOTE_TOKEN and try again.")]
    AuthRequired,
}
