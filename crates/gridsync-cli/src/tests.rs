use std::path::Path;

use clap::{CommandFactory, Parser};
use gridsync_core::config::SyncSettings;
use gridsync_core::db::EscalationReason;
use gridsync_core::models::{GeoPoint, PhotoType};
use gridsync_core::sync::SyncSnapshot;
use gridsync_core::{
    EntityType, Operation, QueueStatus, ResolutionStrategy, SyncQueueItem, SyncStore,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use crate::cli::{Cli, CompletionShell};
use crate::commands::common::{
    build_orchestrator, format_relative_time, infer_mime_type, normalize_identifier,
    parse_payload, resolve_queue_item,
};
use crate::commands::completions::render_completions;
use crate::commands::conflicts::{escalate_queue_item, resolve_conflict_by_query};
use crate::commands::enqueue::enqueue_mutation;
use crate::commands::photo::{queue_photo_file, PhotoAddRequest};
use crate::commands::retry::{describe_retried_item, retry_queue_item};
use crate::commands::status::{collect_status, format_status_lines};
use crate::commands::watch::format_snapshot_line;
use crate::error::CliError;

async fn temp_store() -> (TempDir, SyncSettings, SyncStore) {
    let dir = TempDir::new().unwrap();
    let settings = SyncSettings {
        db_path: Some(dir.path().join("gridsync.db")),
        ..SyncSettings::default()
    };
    let store = SyncStore::open_path(dir.path().join("gridsync.db"))
        .await
        .unwrap();
    (dir, settings, store)
}

async fn enqueue_with_id(store: &SyncStore, id: &str, entity_id: &str) -> SyncQueueItem {
    let mut item = SyncQueueItem::new(
        EntityType::Ticket,
        entity_id,
        Operation::Update,
        json!({"status": "COMPLETE"}),
    )
    .unwrap();
    item.id = id.parse().unwrap();
    store.enqueue(item).await.unwrap()
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn parse_payload_accepts_json_and_rejects_garbage() {
    assert_eq!(parse_payload(None).unwrap(), None);
    assert_eq!(
        parse_payload(Some(r#"{"hours": 4}"#)).unwrap(),
        Some(json!({"hours": 4}))
    );
    assert!(matches!(
        parse_payload(Some("{not json")),
        Err(CliError::InvalidPayload(_))
    ));
}

#[test]
fn normalize_identifier_rejects_blank_input() {
    assert!(matches!(normalize_identifier("  "), Err(CliError::EmptyId)));
    assert_eq!(normalize_identifier(" ABC ").unwrap(), "abc");
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
}

#[test]
fn infer_mime_type_uses_extension() {
    assert_eq!(infer_mime_type(Path::new("pole.JPG")), Some("image/jpeg"));
    assert_eq!(infer_mime_type(Path::new("meter.png")), Some("image/png"));
    assert_eq!(infer_mime_type(Path::new("notes.txt")), None);
    assert_eq!(infer_mime_type(Path::new("no_extension")), None);
}

#[test]
fn completions_name_the_binary() {
    let script = String::from_utf8(render_completions(CompletionShell::Bash)).unwrap();
    assert!(script.contains("gridsync"));
}

#[test]
fn snapshot_line_shows_offline_and_error() {
    let snapshot = SyncSnapshot {
        is_online: false,
        pending_count: 2,
        last_error: Some("Cannot sync while offline.".to_string()),
        ..SyncSnapshot::default()
    };
    let line = format_snapshot_line(&snapshot);
    assert!(line.starts_with("[offline] idle"));
    assert!(line.contains("pending 2"));
    assert!(line.ends_with("Cannot sync while offline."));
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueue_requires_payload_except_for_delete() {
    let (_dir, _settings, store) = temp_store().await;

    let error = enqueue_mutation(&store, EntityType::TimeEntry, "te-1", Operation::Update, None)
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::MissingPayload(_)));

    let deleted = enqueue_mutation(&store, EntityType::Expense, "exp-1", Operation::Delete, None)
        .await
        .unwrap();
    assert_eq!(deleted.status, QueueStatus::Pending);

    let created = enqueue_mutation(
        &store,
        EntityType::TimeEntry,
        "te-1",
        Operation::Create,
        Some(r#"{"hours": 6}"#),
    )
    .await
    .unwrap();
    assert_eq!(created.payload, json!({"hours": 6}));
    assert_eq!(store.list_active().await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn resolve_queue_item_by_exact_and_prefix_id() {
    let (_dir, _settings, store) = temp_store().await;
    enqueue_with_id(&store, "11111111-1111-7111-8111-111111111111", "ticket-a").await;
    enqueue_with_id(&store, "11111111-1111-7111-8111-222222222222", "ticket-b").await;

    let exact = resolve_queue_item(&store, "11111111-1111-7111-8111-111111111111")
        .await
        .unwrap();
    assert_eq!(exact.entity_id, "ticket-a");

    let by_prefix = resolve_queue_item(&store, "11111111-1111-7111-8111-2")
        .await
        .unwrap();
    assert_eq!(by_prefix.entity_id, "ticket-b");

    let ambiguous = resolve_queue_item(&store, "11111111").await.unwrap_err();
    assert!(matches!(ambiguous, CliError::AmbiguousId(_)));

    let missing = resolve_queue_item(&store, "ffff").await.unwrap_err();
    assert!(matches!(missing, CliError::QueueItemNotFound(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_without_remote_returns_item_to_pending() {
    let (_dir, settings, store) = temp_store().await;
    let item = enqueue_with_id(&store, "22222222-2222-7222-8222-222222222222", "ticket-c").await;
    store.mark_syncing(&item.id).await.unwrap();
    store.mark_failed(&item.id, "503 Service Unavailable").await.unwrap();

    let retried = retry_queue_item(&store, &settings, "22222222").await.unwrap();
    assert_eq!(retried.status, QueueStatus::Pending);
    assert_eq!(retried.attempt_count, 1);
    assert_eq!(retried.last_error, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn retried_item_that_left_the_queue_reports_its_conflict() {
    let (_dir, settings, store) = temp_store().await;
    let item = enqueue_with_id(&store, "55555555-5555-7555-8555-555555555555", "ticket-h").await;
    store.mark_syncing(&item.id).await.unwrap();
    store.mark_failed(&item.id, "timeout").await.unwrap();

    let retried = retry_queue_item(&store, &settings, "55555555").await.unwrap();
    let line = describe_retried_item(&store, &retried, settings.retry_budget)
        .await
        .unwrap();
    assert_eq!(line, format!("55555555-5555 is pending (attempt 1 of {})", settings.retry_budget));

    store.mark_syncing(&item.id).await.unwrap();
    let conflict = store
        .escalate(
            &item.id,
            EscalationReason::PermanentFailure("Rejected with HTTP 422: bad status".to_string()),
            settings.retry_budget,
        )
        .await
        .unwrap();

    let line = describe_retried_item(&store, &retried, settings.retry_budget)
        .await
        .unwrap();
    assert!(line.starts_with("55555555-5555 moved to conflict "));
    assert!(line.contains(&conflict.id.as_str()[..13]));
    assert!(line.ends_with("Rejected with HTTP 422: bad status"));
}

#[tokio::test(flavor = "multi_thread")]
async fn escalate_then_keep_local_requeues_the_change() {
    let (_dir, settings, store) = temp_store().await;
    enqueue_with_id(&store, "33333333-3333-7333-8333-333333333333", "ticket-d").await;

    let conflict = escalate_queue_item(&store, &settings, "33333333").await.unwrap();
    assert!(store.list_active().await.unwrap().is_empty());

    let prefix = conflict.id.as_str()[..13].to_string();
    let resolution =
        resolve_conflict_by_query(&store, &prefix, ResolutionStrategy::KeepLocal, None)
            .await
            .unwrap();
    assert!(resolution.conflict.resolved);

    let requeued = resolution.requeued.unwrap();
    assert_eq!(requeued.entity_id, "ticket-d");
    assert_eq!(requeued.status, QueueStatus::Pending);
    assert!(store.list_unresolved_conflicts().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn photo_file_is_queued_with_inferred_mime_type() {
    let (dir, settings, store) = temp_store().await;
    let path = dir.path().join("transformer.jpg");
    std::fs::write(&path, b"not really a jpeg").unwrap();

    let photo = queue_photo_file(
        &store,
        &settings,
        PhotoAddRequest {
            parent_type: EntityType::Ticket,
            parent_id: "ticket-e".to_string(),
            path,
            photo_type: PhotoType::Equipment,
            mime_type: None,
            location: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(photo.mime_type, "image/jpeg");
    assert_eq!(photo.size_bytes, 17);
    assert!(!photo.compressed);

    let status = collect_status(&store, &settings).await.unwrap();
    assert_eq!(status.counts.pending_photos, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn photo_location_is_validated_and_queued() {
    let (dir, settings, store) = temp_store().await;
    let path = dir.path().join("meter.png");
    std::fs::write(&path, b"png bytes").unwrap();
    let request = |location| PhotoAddRequest {
        parent_type: EntityType::Ticket,
        parent_id: "ticket-i".to_string(),
        path: path.clone(),
        photo_type: PhotoType::Overview,
        mime_type: None,
        location,
    };

    let error = queue_photo_file(&store, &settings, request(Some((95.0, 10.0))))
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::Core(_)));

    let photo = queue_photo_file(&store, &settings, request(Some((27.95, -82.45))))
        .await
        .unwrap();
    assert_eq!(
        photo.location,
        Some(GeoPoint {
            latitude: 27.95,
            longitude: -82.45
        })
    );
}

#[test]
fn photo_location_needs_both_coordinates() {
    let parsed = Cli::try_parse_from([
        "gridsync", "photo", "add", "ticket", "t-1", "pole.jpg", "--latitude", "27.95",
    ]);
    assert!(parsed.is_err());

    let parsed = Cli::try_parse_from([
        "gridsync", "photo", "add", "ticket", "t-1", "pole.jpg", "--latitude", "27.95",
        "--longitude", "-82.45",
    ]);
    assert!(parsed.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn photo_with_unknown_extension_needs_mime_type() {
    let (dir, settings, store) = temp_store().await;
    let path = dir.path().join("capture.bin");
    std::fs::write(&path, b"bytes").unwrap();

    let error = queue_photo_file(
        &store,
        &settings,
        PhotoAddRequest {
            parent_type: EntityType::Ticket,
            parent_id: "ticket-f".to_string(),
            path,
            photo_type: PhotoType::Context,
            mime_type: None,
            location: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(error, CliError::UnknownMimeType(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn status_reports_counts_and_missing_remote() {
    let (_dir, settings, store) = temp_store().await;
    enqueue_with_id(&store, "44444444-4444-7444-8444-444444444444", "ticket-g").await;

    let report = collect_status(&store, &settings).await.unwrap();
    assert_eq!(report.counts.pending, 1);
    assert_eq!(report.counts.conflicts, 0);
    assert_eq!(report.lifetime.synced_total, 0);

    let lines = format_status_lines(&report);
    assert!(lines.iter().any(|line| line.contains("never")));
    assert!(lines
        .iter()
        .any(|line| line.contains("GRIDSYNC_API_BASE_URL")));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_requires_remote_configuration() {
    let (_dir, settings, store) = temp_store().await;

    let error = build_orchestrator(store, &settings).err().unwrap();
    assert!(matches!(error, CliError::SyncNotConfigured));
}
