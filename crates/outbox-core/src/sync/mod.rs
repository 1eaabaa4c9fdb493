//! Delivery of queued operations to the remote store.

mod backoff;
mod dispatcher;
mod http;

use std::future::Future;

use serde::Serialize;

use crate::models::{OperationId, OperationRecord};

pub use backoff::{RetryPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_MAX_RETRIES};
pub use dispatcher::{Dispatcher, TickReport};
pub use http::HttpTransport;

/// Classified result of one send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The remote store applied the operation
    Success,
    /// Retryable: network trouble, 5xx, 429 or a send timeout
    TransientFailure(String),
    /// The remote store rejected the operation itself
    PermanentFailure(String),
    /// Credentials were rejected; retry after re-authentication
    AuthFailure,
}

impl Outcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientFailure(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::PermanentFailure(reason.into())
    }
}

/// Map an HTTP status code onto the outcome taxonomy.
#[must_use]
pub fn classify_status(status: u16) -> Outcome {
    match status {
        200..=299 => Outcome::Success,
        401 | 403 => Outcome::AuthFailure,
        429 | 500..=599 => Outcome::transient(format!("HTTP {status}")),
        _ => Outcome::permanent(format!("HTTP {status}")),
    }
}

/// Sends one operation to the remote store.
///
/// Implementations classify every failure into an [`Outcome`]; they never
/// touch the queue.
pub trait Transport {
    fn send(&self, record: &OperationRecord) -> impl Future<Output = Outcome> + Send;
}

/// Broadcast to subscribers as the dispatcher settles records
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Synced {
        id: OperationId,
    },
    RetryScheduled {
        id: OperationId,
        retry_count: u32,
        next_attempt_at: i64,
        reason: String,
    },
    Failed {
        id: OperationId,
        retry_count: u32,
        reason: String,
    },
    /// The remote store rejected our credentials; the batch was halted.
    AuthRequired,
}
