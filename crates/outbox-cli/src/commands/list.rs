use std::path::Path;

use outbox_core::util::unix_millis_now;
use outbox_core::OperationStatus;

use crate::commands::common::{
    format_record_lines, open_store, record_to_list_item, OperationListItem,
};
use crate::error::CliError;

pub async fn run_list(
    status: Option<OperationStatus>,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let records = store.list(status, limit).await?;
    let now_ms = unix_millis_now();

    if as_json {
        let json_items = records
            .iter()
            .map(|record| record_to_list_item(record, now_ms))
            .collect::<Vec<OperationListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_record_lines(&records, now_ms) {
        println!("{line}");
    }
    Ok(())
}
