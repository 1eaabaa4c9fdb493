//! Data models for Outbox

mod intent;
mod operation;
mod queue_status;

pub use intent::Intent;
pub use operation::{EntityType, OperationId, OperationKind, OperationRecord, OperationStatus};
pub use queue_status::QueueStatus;
