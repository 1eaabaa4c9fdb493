//! Services shared by application code and the sync dispatcher.

mod queue_store;

pub use queue_store::{DispatchLease, Enqueued, QueueStore};
