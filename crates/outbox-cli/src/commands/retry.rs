use std::path::Path;

use outbox_core::OperationId;

use crate::commands::common::open_store;
use crate::error::CliError;

pub async fn run_retry(id: &OperationId, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let enqueued = store.retry(id).await?;
    println!("Re-queued {}", enqueued.id());
    Ok(())
}
