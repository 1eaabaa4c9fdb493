use std::path::Path;

use outbox_core::SyncEvent;
use tokio::sync::{broadcast, watch};

use crate::commands::common::{format_timestamp, open_dispatcher};
use crate::error::CliError;

pub async fn run_scheduler(db_path: &Path) -> Result<(), CliError> {
    let dispatcher = open_dispatcher(db_path).await?;
    let (shutdown, shutdown_rx) = watch::channel(false);
    let mut events = dispatcher.subscribe();

    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", describe_event(&event)),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Dropped {missed} sync event(s)");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let signal = tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {error}");
        }
        shutdown.send(true).ok();
    });

    dispatcher.run(shutdown_rx).await;
    drop(dispatcher);
    signal.abort();
    reporter.await.ok();
    Ok(())
}

pub fn describe_event(event: &SyncEvent) -> String {
    match event {
        SyncEvent::Synced { id } => format!("synced {id}"),
        SyncEvent::RetryScheduled {
            id,
            retry_count,
            next_attempt_at,
            reason,
        } => format!(
            "retry #{retry_count} for {id} at {}: {reason}",
            format_timestamp(*next_attempt_at)
        ),
        SyncEvent::Failed {
            id,
            retry_count,
            reason,
        } => format!("failed {id} after {retry_count} retries: {reason}"),
        SyncEvent::AuthRequired => {
            "remote rejected credentials; refresh OUTBOX_REMOTE_TOKEN".to_string()
        }
    }
}
