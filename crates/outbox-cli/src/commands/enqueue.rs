use std::path::Path;

use outbox_core::{EntityType, Intent, OperationKind};

use crate::commands::common::{describe_enqueued, open_store, parse_payload};
use crate::error::CliError;

pub async fn run_enqueue(
    entity_type: EntityType,
    entity_id: &str,
    kind: OperationKind,
    payload: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let intent = Intent::new(entity_type, entity_id, kind, parse_payload(payload)?)?;
    let store = open_store(db_path)?;

    let enqueued = store.enqueue(intent).await.map_err(|error| match error {
        outbox_core::Error::QuotaExceeded => CliError::QuotaExceeded,
        other => CliError::Core(other),
    })?;

    println!("{}", describe_enqueued(enqueued));
    Ok(())
}
