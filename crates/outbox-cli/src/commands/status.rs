use std::path::Path;

use crate::commands::common::{format_status_lines, open_store, status_to_item};
use crate::error::CliError;

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let status = store.queue_status().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status_to_item(&status))?);
    } else {
        for line in format_status_lines(&status) {
            println!("{line}");
        }
    }

    Ok(())
}
