use std::path::Path;

use outbox_core::OperationId;

use crate::commands::common::open_store;
use crate::error::CliError;

pub async fn run_discard(id: &OperationId, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let record = store.discard(id).await?;
    println!(
        "Discarded {} {}/{} ({})",
        record.kind, record.entity_type, record.entity_id, record.id
    );
    Ok(())
}
