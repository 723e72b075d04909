use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gridsync_core::config::SyncSettings;
use gridsync_core::remote::HttpRemoteEndpoint;
use gridsync_core::sync::SyncOrchestrator;
use gridsync_core::util::{compact_text, unix_millis_now};
use gridsync_core::{LocalSyncConflict, QueueItemId, SyncQueueItem, SyncStore};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;

#[derive(Debug, Serialize)]
pub struct QueueItemView {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: String,
    pub status: String,
    pub attempt_count: u32,
    pub created_at: i64,
    pub relative_time: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConflictView {
    pub id: String,
    pub source_queue_item_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: String,
    pub reason: Option<String>,
    pub local_payload: Value,
    pub remote_payload: Option<Value>,
    pub resolved: bool,
    pub resolution_strategy: Option<String>,
    pub created_at: i64,
    pub created_at_iso: String,
}

/// Load settings, letting `--db-path` win over the file and environment.
pub fn load_settings(
    config_path: Option<&Path>,
    db_path: Option<PathBuf>,
) -> Result<SyncSettings, CliError> {
    let mut settings = SyncSettings::load(config_path)?;
    if let Some(db_path) = db_path {
        settings.db_path = Some(db_path);
    }
    Ok(settings)
}

pub async fn open_store(settings: &SyncSettings) -> Result<SyncStore, CliError> {
    let path = settings.resolved_db_path()?;
    let store = SyncStore::open_path(path).await?;

    let reclassified = store.reclassified_on_open().await;
    if reclassified > 0 {
        tracing::info!("{reclassified} interrupted item(s) returned to pending");
    }
    Ok(store)
}

pub fn build_orchestrator(
    store: SyncStore,
    settings: &SyncSettings,
) -> Result<SyncOrchestrator<HttpRemoteEndpoint>, CliError> {
    if settings.api_base_url.is_none() {
        return Err(CliError::SyncNotConfigured);
    }
    let remote = HttpRemoteEndpoint::from_settings(settings)?;
    Ok(SyncOrchestrator::new(store, Arc::new(remote), settings))
}

/// Parse a JSON payload argument; `-` reads it from stdin.
pub fn parse_payload(raw: Option<&str>) -> Result<Option<Value>, CliError> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let text = if raw.trim() == "-" {
        read_piped_stdin()?.unwrap_or_default()
    } else {
        raw.to_string()
    };

    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|error| CliError::InvalidPayload(error.to_string()))
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut input = String::new();
    stdin.read_to_string(&mut input)?;
    Ok(Some(input))
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let normalized = id.trim();
    if normalized.is_empty() {
        return Err(CliError::EmptyId);
    }
    Ok(normalized.to_ascii_lowercase())
}

/// Find an active queue item by full ID or unique prefix.
pub async fn resolve_queue_item(
    store: &SyncStore,
    query: &str,
) -> Result<SyncQueueItem, CliError> {
    let query = normalize_identifier(query)?;
    if let Ok(id) = query.parse::<QueueItemId>() {
        if let Some(item) = store.get_item(&id).await? {
            return Ok(item);
        }
    }

    let mut matches = store
        .list_active()
        .await?
        .into_iter()
        .filter(|item| item.id.as_str().starts_with(&query))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::QueueItemNotFound(query)),
        1 => Ok(matches.remove(0)),
        _ => Err(ambiguous(
            &query,
            matches.iter().map(|item| item.id.as_str()),
        )),
    }
}

/// Find a conflict (resolved or not) by full ID or unique prefix.
pub async fn resolve_conflict(
    store: &SyncStore,
    query: &str,
) -> Result<LocalSyncConflict, CliError> {
    let query = normalize_identifier(query)?;
    let mut matches = store
        .list_all_conflicts()
        .await?
        .into_iter()
        .filter(|conflict| conflict.id.as_str().starts_with(&query))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::ConflictNotFound(query)),
        1 => Ok(matches.remove(0)),
        _ => Err(ambiguous(
            &query,
            matches.iter().map(|conflict| conflict.id.as_str()),
        )),
    }
}

fn ambiguous(query: &str, ids: impl Iterator<Item = String>) -> CliError {
    let options = ids
        .take(3)
        .map(|id| short_id(&id))
        .collect::<Vec<_>>()
        .join(", ");
    CliError::AmbiguousId(format!(
        "ID prefix '{query}' is ambiguous. Matches: {options}. Use a longer prefix."
    ))
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

pub fn queue_item_to_view(item: &SyncQueueItem, now_ms: i64) -> QueueItemView {
    QueueItemView {
        id: item.id.as_str(),
        entity_type: item.entity_type.to_string(),
        entity_id: item.entity_id.clone(),
        operation: item.operation.to_string(),
        status: item.status.to_string(),
        attempt_count: item.attempt_count,
        created_at: item.created_at,
        relative_time: format_relative_time(item.created_at, now_ms),
        last_error: item.last_error.clone(),
    }
}

pub fn format_queue_lines(items: &[SyncQueueItem], retry_budget: u32) -> Vec<String> {
    let now = unix_millis_now();
    items
        .iter()
        .map(|item| {
            let mut line = format!(
                "{}  {:<7}  {} {} {}  [{}/{}]  {}",
                short_id(&item.id.as_str()),
                item.status,
                item.operation,
                item.entity_type,
                item.entity_id,
                item.attempt_count,
                retry_budget,
                format_relative_time(item.created_at, now)
            );
            if let Some(error) = &item.last_error {
                line.push_str("  ");
                line.push_str(&compact_text(error));
            }
            line
        })
        .collect()
}

pub fn conflict_to_view(conflict: &LocalSyncConflict) -> ConflictView {
    ConflictView {
        id: conflict.id.as_str(),
        source_queue_item_id: conflict.source_queue_item_id.as_str(),
        entity_type: conflict.entity_type.to_string(),
        entity_id: conflict.entity_id.clone(),
        operation: conflict.operation.to_string(),
        reason: conflict.reason.clone(),
        local_payload: conflict.local_payload.clone(),
        remote_payload: conflict.remote_payload.clone(),
        resolved: conflict.resolved,
        resolution_strategy: conflict.resolution_strategy.map(|strategy| strategy.to_string()),
        created_at: conflict.created_at,
        created_at_iso: format_timestamp(conflict.created_at),
    }
}

pub fn format_conflict_lines(conflicts: &[LocalSyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let state = conflict
                .resolution_strategy
                .map_or_else(|| "open".to_string(), |strategy| strategy.to_string());
            format!(
                "{}  {} {} {}  [{}]  {}  {}",
                short_id(&conflict.id.as_str()),
                conflict.operation,
                conflict.entity_type,
                conflict.entity_id,
                state,
                format_timestamp(conflict.created_at),
                conflict.reason.as_deref().unwrap_or("no reason recorded")
            )
        })
        .collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

/// Guess an image MIME type from the file extension.
pub fn infer_mime_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
