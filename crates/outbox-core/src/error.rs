//! Error types for outbox-core

use thiserror::Error;

/// Result type alias using outbox-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in outbox-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local storage rejected a write because its capacity is exhausted
    #[error("Local storage quota exceeded; the operation was not queued")]
    QuotaExceeded,

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation record not found
    #[error("Operation not found: {0}")]
    NotFound(String),

    /// Another dispatcher already holds the queue's dispatch lease
    #[error("Another dispatcher is already running against {0}")]
    Locked(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        if error.sqlite_error_code() == Some(rusqlite::ErrorCode::DiskFull) {
            Self::QuotaExceeded
        } else {
            Self::Sqlite(error)
        }
    }
}
