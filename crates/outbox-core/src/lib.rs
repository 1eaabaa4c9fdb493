//! outbox-core - Core library for Outbox
//!
//! This crate contains the durable operation queue, the merge engine that
//! collapses queued mutations per entity, and the dispatcher that drains the
//! queue to a remote store with retry and backoff.

pub mod config;
pub mod db;
pub mod error;
pub mod merge;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use config::{ConfigError, RemoteConfig, SyncConfig};
pub use error::{Error, Result};
pub use models::{
    EntityType, Intent, OperationId, OperationKind, OperationRecord, OperationStatus, QueueStatus,
};
pub use services::{DispatchLease, Enqueued, QueueStore};
pub use sync::{Dispatcher, HttpTransport, Outcome, RetryPolicy, SyncEvent, TickReport, Transport};
