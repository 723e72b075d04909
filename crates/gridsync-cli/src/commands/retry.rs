use gridsync_core::config::SyncSettings;
use gridsync_core::{SyncQueueItem, SyncStore};

use crate::commands::common::{build_orchestrator, resolve_queue_item, short_id};
use crate::error::CliError;

pub async fn run_retry(
    store: &SyncStore,
    settings: &SyncSettings,
    query: &str,
) -> Result<(), CliError> {
    let item = retry_queue_item(store, settings, query).await?;
    println!("{}", describe_retried_item(store, &item, settings.retry_budget).await?);
    Ok(())
}

/// Where a retried item ended up. An item that left the queue either synced
/// or was moved to conflicts by the immediate pass.
pub async fn describe_retried_item(
    store: &SyncStore,
    item: &SyncQueueItem,
    retry_budget: u32,
) -> Result<String, CliError> {
    if let Some(current) = store.get_item(&item.id).await? {
        return Ok(format!(
            "{} is {} (attempt {} of {})",
            short_id(&current.id.as_str()),
            current.status,
            current.attempt_count,
            retry_budget
        ));
    }

    let conflict = store
        .list_all_conflicts()
        .await?
        .into_iter()
        .find(|conflict| conflict.source_queue_item_id == item.id);
    Ok(match conflict {
        Some(conflict) => format!(
            "{} moved to conflict {}: {}",
            short_id(&item.id.as_str()),
            short_id(&conflict.id.as_str()),
            conflict.reason.as_deref().unwrap_or("no reason recorded")
        ),
        None => format!("{} synced", short_id(&item.id.as_str())),
    })
}

/// Reset an item to pending; sync straight away when a remote is configured.
pub async fn retry_queue_item(
    store: &SyncStore,
    settings: &SyncSettings,
    query: &str,
) -> Result<SyncQueueItem, CliError> {
    let item = resolve_queue_item(store, query).await?;

    if settings.api_base_url.is_some() {
        let orchestrator = build_orchestrator(store.clone(), settings)?;
        return Ok(orchestrator.retry_item(&item.id).await?);
    }

    let item = store.retry_item(&item.id).await?;
    tracing::info!("Remote API not configured; item stays pending until the next sync");
    Ok(item)
}
