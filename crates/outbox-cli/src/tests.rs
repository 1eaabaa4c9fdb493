use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use outbox_core::{
    EntityType, Enqueued, OperationId, OperationKind, OperationStatus, QueueStatus, SyncEvent,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::cli::{Cli, Commands, KindArg, StatusArg};
use crate::commands::common::{
    describe_enqueued, format_age, format_relative_time, format_status_lines, open_store,
    parse_payload, resolve_db_path, status_to_item,
};
use crate::commands::discard::run_discard;
use crate::commands::enqueue::run_enqueue;
use crate::commands::retry::run_retry;
use crate::commands::run::describe_event;
use crate::error::CliError;

#[test]
fn enqueue_arguments_parse_into_core_types() {
    let cli = Cli::try_parse_from([
        "outbox",
        "--db-path",
        "/tmp/queue.db",
        "enqueue",
        "Player",
        "p1",
        "create",
        "--payload",
        r#"{"name":"Ada"}"#,
    ])
    .unwrap();

    assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/queue.db")));
    match cli.command {
        Commands::Enqueue {
            entity_type,
            entity_id,
            kind,
            payload,
        } => {
            assert_eq!(entity_type, EntityType::Player);
            assert_eq!(entity_id, "p1");
            assert_eq!(kind, KindArg::Create);
            assert_eq!(OperationKind::from(kind), OperationKind::Create);
            assert_eq!(payload.as_deref(), Some(r#"{"name":"Ada"}"#));
        }
        _ => panic!("expected enqueue command"),
    }
}

#[test]
fn list_accepts_status_filter_and_global_db_path() {
    let cli = Cli::try_parse_from(["outbox", "list", "--status", "failed", "--db-path", "q.db"])
        .unwrap();
    assert_eq!(cli.db_path, Some(PathBuf::from("q.db")));
    match cli.command {
        Commands::List { status, limit, json } => {
            assert_eq!(status, Some(StatusArg::Failed));
            assert_eq!(status.map(OperationStatus::from), Some(OperationStatus::Failed));
            assert_eq!(limit, 50);
            assert!(!json);
        }
        _ => panic!("expected list command"),
    }
}

#[test]
fn unknown_entity_type_is_rejected() {
    assert!(Cli::try_parse_from(["outbox", "enqueue", "note", "n1", "delete"]).is_err());
    assert!(Cli::try_parse_from(["outbox", "retry", "not-a-uuid"]).is_err());
}

#[test]
fn parse_payload_rejects_invalid_json() {
    assert_eq!(parse_payload(None).unwrap(), None);
    assert_eq!(
        parse_payload(Some(r#"{"a":1}"#)).unwrap(),
        Some(serde_json::json!({ "a": 1 }))
    );
    assert!(matches!(
        parse_payload(Some("{not json")),
        Err(CliError::InvalidPayload(_))
    ));
}

#[test]
fn explicit_db_path_wins() {
    let path = PathBuf::from("/tmp/explicit.db");
    assert_eq!(resolve_db_path(Some(path.clone())), path);
}

#[test]
fn ages_are_compact() {
    assert_eq!(format_age(Duration::from_secs(42)), "42s");
    assert_eq!(format_age(Duration::from_secs(125)), "2m");
    assert_eq!(format_age(Duration::from_secs(7_200)), "2h");
    assert_eq!(format_age(Duration::from_secs(172_800)), "2d");
    assert_eq!(format_relative_time(1_000, 61_000), "1m ago");
    assert_eq!(format_relative_time(5_000, 1_000), "0s ago");
}

#[test]
fn status_lines_and_json_item() {
    let status = QueueStatus {
        pending_count: 3,
        syncing_count: 1,
        failed_count: 2,
        oldest_pending_age: Some(Duration::from_secs(90)),
    };

    assert_eq!(
        format_status_lines(&status),
        vec![
            "pending: 3".to_string(),
            "syncing: 1".to_string(),
            "failed:  2".to_string(),
            "oldest pending: 1m".to_string(),
        ]
    );
    assert_eq!(status_to_item(&status).oldest_pending_age_ms, Some(90_000));
    assert_eq!(
        format_status_lines(&QueueStatus::default())[3],
        "oldest pending: -"
    );
}

#[test]
fn enqueue_and_event_descriptions() {
    let id = OperationId::new();
    assert_eq!(describe_enqueued(Enqueued::Inserted(id)), format!("queued {id}"));
    assert_eq!(
        describe_enqueued(Enqueued::Cancelled(id)),
        format!("cancelled {id}")
    );
    assert_eq!(describe_event(&SyncEvent::Synced { id }), format!("synced {id}"));
    assert!(describe_event(&SyncEvent::Failed {
        id,
        retry_count: 10,
        reason: "HTTP 503".to_string(),
    })
    .ends_with("after 10 retries: HTTP 503"));
}

#[tokio::test]
async fn enqueue_command_writes_to_queue_file() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("nested").join("queue.db");

    run_enqueue(
        EntityType::Game,
        "g1",
        OperationKind::Create,
        Some(r#"{"home":2,"away":1}"#),
        &db_path,
    )
    .await
    .unwrap();
    run_enqueue(EntityType::Game, "g1", OperationKind::Delete, None, &db_path)
        .await
        .unwrap();
    run_enqueue(
        EntityType::Team,
        "t1",
        OperationKind::Update,
        Some(r#"{"name":"Owls"}"#),
        &db_path,
    )
    .await
    .unwrap();

    let store = open_store(&db_path).unwrap();
    let records = store.list(None, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].entity_type, EntityType::Team);
}

#[tokio::test]
async fn enqueue_command_validates_payload_shape() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("queue.db");

    let missing = run_enqueue(EntityType::Game, "g1", OperationKind::Update, None, &db_path).await;
    assert!(matches!(
        missing,
        Err(CliError::Core(outbox_core::Error::InvalidInput(_)))
    ));

    let extra = run_enqueue(
        EntityType::Game,
        "g1",
        OperationKind::Delete,
        Some("{}"),
        &db_path,
    )
    .await;
    assert!(extra.is_err());
}

#[tokio::test]
async fn retry_and_discard_refuse_pending_operations() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("queue.db");

    run_enqueue(
        EntityType::Season,
        "s1",
        OperationKind::Create,
        Some(r#"{"year":2026}"#),
        &db_path,
    )
    .await
    .unwrap();
    let id = open_store(&db_path).unwrap().list(None, 1).await.unwrap()[0].id;

    assert!(run_retry(&id, &db_path).await.is_err());
    assert!(run_discard(&id, &db_path).await.is_err());
    assert!(matches!(
        run_discard(&OperationId::new(), &db_path).await,
        Err(CliError::Core(outbox_core::Error::NotFound(_)))
    ));
}
