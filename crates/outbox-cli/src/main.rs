//! Outbox CLI - inspect and drain the local sync queue
//!
//! Queue mutations by hand, watch queue health, and push pending work to the
//! remote store configured through `OUTBOX_REMOTE_URL`.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::resolve_db_path;
use crate::commands::discard::run_discard;
use crate::commands::enqueue::run_enqueue;
use crate::commands::list::run_list;
use crate::commands::retry::run_retry;
use crate::commands::run::run_scheduler;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "outbox=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Enqueue {
            entity_type,
            entity_id,
            kind,
            payload,
        } => {
            run_enqueue(
                entity_type,
                &entity_id,
                kind.into(),
                payload.as_deref(),
                &db_path,
            )
            .await?;
        }
        Commands::Status { json } => run_status(json, &db_path).await?,
        Commands::List {
            status,
            limit,
            json,
        } => run_list(status.map(Into::into), limit, json, &db_path).await?,
        Commands::Sync { json } => run_sync(json, &db_path).await?,
        Commands::Run => run_scheduler(&db_path).await?,
        Commands::Retry { id } => run_retry(&id, &db_path).await?,
        Commands::Discard { id } => run_discard(&id, &db_path).await?,
    }

    Ok(())
}
