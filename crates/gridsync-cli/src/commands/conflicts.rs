use gridsync_core::config::SyncSettings;
use gridsync_core::db::{ConflictResolution, EscalationReason};
use gridsync_core::{LocalSyncConflict, ResolutionStrategy, SyncStore};

use crate::commands::common::{
    conflict_to_view, format_conflict_lines, parse_payload, resolve_conflict, resolve_queue_item,
    short_id, ConflictView,
};
use crate::error::CliError;

pub async fn run_conflicts_list(
    store: &SyncStore,
    include_resolved: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let conflicts = if include_resolved {
        store.list_all_conflicts().await?
    } else {
        store.list_unresolved_conflicts().await?
    };

    if as_json {
        let views = conflicts
            .iter()
            .map(conflict_to_view)
            .collect::<Vec<ConflictView>>();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_conflicts_escalate(
    store: &SyncStore,
    settings: &SyncSettings,
    query: &str,
) -> Result<(), CliError> {
    let conflict = escalate_queue_item(store, settings, query).await?;
    println!("{}", conflict.id);
    Ok(())
}

pub async fn escalate_queue_item(
    store: &SyncStore,
    settings: &SyncSettings,
    query: &str,
) -> Result<LocalSyncConflict, CliError> {
    let item = resolve_queue_item(store, query).await?;
    Ok(store
        .escalate(&item.id, EscalationReason::Operator, settings.retry_budget)
        .await?)
}

pub async fn run_conflicts_resolve(
    store: &SyncStore,
    query: &str,
    strategy: ResolutionStrategy,
    payload: Option<&str>,
) -> Result<(), CliError> {
    let resolution = resolve_conflict_by_query(store, query, strategy, payload).await?;

    match &resolution.requeued {
        Some(item) => println!(
            "Resolved {} with {strategy}; queued {} for replay",
            short_id(&resolution.conflict.id.as_str()),
            short_id(&item.id.as_str())
        ),
        None => println!(
            "Resolved {} with {strategy}; local change discarded",
            short_id(&resolution.conflict.id.as_str())
        ),
    }
    Ok(())
}

pub async fn resolve_conflict_by_query(
    store: &SyncStore,
    query: &str,
    strategy: ResolutionStrategy,
    payload: Option<&str>,
) -> Result<ConflictResolution, CliError> {
    let conflict = resolve_conflict(store, query).await?;
    let payload = parse_payload(payload)?;
    Ok(store.resolve_conflict(&conflict.id, strategy, payload).await?)
}
