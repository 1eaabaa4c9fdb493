use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use outbox_core::{EntityType, OperationId, OperationKind, OperationStatus};

#[derive(Parser)]
#[command(name = "outbox")]
#[command(about = "Inspect and drain the local sync queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the queue database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a mutation for an entity
    Enqueue {
        /// Entity type (player, game, team, season, tournament, settings)
        entity_type: EntityType,
        /// Entity ID
        entity_id: String,
        /// Mutation kind
        kind: KindArg,
        /// Entity snapshot as JSON (required for create/update)
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
    },
    /// Show queue counts and the age of the oldest pending operation
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued operations
    List {
        /// Only show operations in this status
        #[arg(long)]
        status: Option<StatusArg>,
        /// Number of operations to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send one batch of ready operations to the remote store
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing on an interval until interrupted
    Run,
    /// Re-queue a failed operation with a fresh retry budget
    Retry {
        /// Operation ID
        id: OperationId,
    },
    /// Drop a failed operation without sending it
    Discard {
        /// Operation ID
        id: OperationId,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    Create,
    Update,
    Delete,
}

impl From<KindArg> for OperationKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Create => Self::Create,
            KindArg::Update => Self::Update,
            KindArg::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Pending,
    Syncing,
    Failed,
}

impl From<StatusArg> for OperationStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => Self::Pending,
            StatusArg::Syncing => Self::Syncing,
            StatusArg::Failed => Self::Failed,
        }
    }
}
