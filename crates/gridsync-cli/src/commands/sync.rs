use gridsync_core::config::SyncSettings;
use gridsync_core::sync::{SyncOutcome, SyncSnapshot};
use gridsync_core::SyncStore;
use serde::Serialize;

use crate::commands::common::{build_orchestrator, short_id};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct SyncReport {
    outcome: SyncOutcome,
    snapshot: SyncSnapshot,
}

pub async fn run_sync(
    store: &SyncStore,
    settings: &SyncSettings,
    as_json: bool,
) -> Result<(), CliError> {
    let orchestrator = build_orchestrator(store.clone(), settings)?;
    let outcome = orchestrator.sync_now().await?;
    let snapshot = orchestrator.snapshot();

    if as_json {
        let report = SyncReport { outcome, snapshot };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match outcome {
        SyncOutcome::Completed(summary) => {
            println!(
                "Sync completed: {} mutations, {} photos, {} duplicates skipped",
                summary.replay.succeeded, summary.photos.succeeded, summary.photos.duplicates
            );
            let escalated = summary.escalated + summary.replay.escalated;
            if escalated > 0 {
                println!("{escalated} item(s) moved to conflicts");
            }
            for error in &summary.photos.errors {
                println!(
                    "Photo {} not uploaded: {}",
                    short_id(&error.photo_id.as_str()),
                    error.message
                );
            }
        }
        SyncOutcome::Coalesced => println!("A sync pass is already running"),
        SyncOutcome::Offline => {}
    }

    if let Some(error) = &snapshot.last_error {
        println!("{error}");
    }
    Ok(())
}
