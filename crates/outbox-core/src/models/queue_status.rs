//! Queue status summary model

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Snapshot of queue health for UI and observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Records waiting to be sent, including those in backoff
    pub pending_count: usize,
    /// Records with a remote call in flight
    pub syncing_count: usize,
    /// Records in terminal failure
    pub failed_count: usize,
    /// Age of the oldest pending record
    pub oldest_pending_age: Option<Duration>,
}

impl QueueStatus {
    /// True when nothing is waiting, in flight, or failed
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.pending_count == 0 && self.syncing_count == 0 && self.failed_count == 0
    }
}
