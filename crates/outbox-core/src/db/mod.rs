//! Database layer for Outbox

mod connection;
mod migrations;
mod repository;

pub use connection::{Database, StorageConfig};
pub use migrations::CURRENT_VERSION as SCHEMA_VERSION;
pub use repository::{QueueRepository, SqliteQueueRepository, StatusCounts};
