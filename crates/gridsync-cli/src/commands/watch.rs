use std::sync::Arc;
use std::time::Duration;

use gridsync_core::config::SyncSettings;
use gridsync_core::sync::{
    spawn_ticker, BackgroundSyncRegistrar, NoServiceWorker, PlatformEvent, SyncSnapshot,
};
use gridsync_core::SyncStore;
use tokio::sync::mpsc;

use crate::commands::common::{build_orchestrator, format_timestamp};
use crate::error::CliError;

const EVENT_BUFFER: usize = 16;

pub async fn run_watch(
    store: SyncStore,
    settings: &SyncSettings,
    interval_secs: Option<u64>,
) -> Result<(), CliError> {
    let period = interval_secs
        .filter(|secs| *secs > 0)
        .map_or_else(|| settings.refresh_interval(), Duration::from_secs);

    let registrar = BackgroundSyncRegistrar::new(
        Arc::new(NoServiceWorker),
        settings.service_worker_script.clone(),
        settings.background_sync_tags.clone(),
    );
    let orchestrator = Arc::new(build_orchestrator(store, settings)?.with_registrar(registrar));
    orchestrator.start().await?;

    let mut updates = orchestrator.subscribe();
    let (events, receiver) = mpsc::channel(EVENT_BUFFER);
    let worker = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(receiver).await })
    };
    let ticker = spawn_ticker(period, events.clone());
    // Treat startup as a connectivity change so queued work goes out immediately.
    if events.send(PlatformEvent::Online).await.is_err() {
        tracing::warn!("Sync worker exited before the first pass");
    }

    println!("Watching queue every {}s (Ctrl+C to stop)", period.as_secs());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                println!("{}", format_snapshot_line(&snapshot));
            }
        }
    }

    ticker.abort();
    drop(events);
    if let Err(error) = worker.await {
        tracing::warn!("Sync worker stopped abnormally: {error}");
    }
    Ok(())
}

pub fn format_snapshot_line(snapshot: &SyncSnapshot) -> String {
    let mut line = format!(
        "[{}] {} | pending {} (photos {}, time entries {}) | failed {} | conflicts {} | last sync {}",
        if snapshot.is_online { "online" } else { "offline" },
        snapshot.sync_state,
        snapshot.pending_count,
        snapshot.pending_photo_count,
        snapshot.pending_time_entry_count,
        snapshot.failed_count,
        snapshot.conflict_count,
        snapshot
            .last_synced_at
            .map_or_else(|| "never".to_string(), format_timestamp)
    );
    if let Some(error) = &snapshot.last_error {
        line.push_str(" | ");
        line.push_str(error);
    }
    line
}
