use std::path::Path;

use crate::commands::common::open_dispatcher;
use crate::error::CliError;

pub async fn run_sync(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let dispatcher = open_dispatcher(db_path).await?;
    let report = dispatcher.tick().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.claimed == 0 && !report.auth_halted {
        println!("Nothing to sync");
    } else {
        println!(
            "Sent {}: {} synced, {} retrying, {} failed",
            report.claimed, report.succeeded, report.retried, report.failed
        );
    }

    if report.auth_halted {
        return Err(CliError::AuthRequired);
    }
    Ok(())
}
