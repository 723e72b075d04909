use gridsync_core::config::SyncSettings;
use gridsync_core::db::SyncCounters;
use gridsync_core::services::StoreCounts;
use gridsync_core::SyncStore;
use serde::Serialize;

use crate::commands::common::format_timestamp;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub db_path: Option<String>,
    pub api_base_url: Option<String>,
    #[serde(flatten)]
    pub counts: StoreCounts,
    pub lifetime: SyncCounters,
}

pub async fn collect_status(
    store: &SyncStore,
    settings: &SyncSettings,
) -> Result<StatusReport, CliError> {
    Ok(StatusReport {
        db_path: store.db_path().map(|path| path.display().to_string()),
        api_base_url: settings.api_base_url.clone(),
        counts: store.counts().await?,
        lifetime: store.counters().await?,
    })
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let counts = &report.counts;
    let mut lines = vec![
        format!("Pending:        {}", counts.pending),
        format!("  photos:       {}", counts.pending_photos),
        format!("  time entries: {}", counts.pending_time_entries),
        format!("Failed:         {}", counts.failed),
        format!("Conflicts:      {}", counts.conflicts),
        format!(
            "Last synced:    {}",
            counts
                .last_synced_at
                .map_or_else(|| "never".to_string(), format_timestamp)
        ),
        format!(
            "Lifetime:       {} synced, {} duplicates, {} conflicts",
            report.lifetime.synced_total,
            report.lifetime.duplicates_total,
            report.lifetime.conflicts_total
        ),
    ];

    if report.api_base_url.is_none() {
        lines.push("Remote API not configured; set GRIDSYNC_API_BASE_URL to sync.".to_string());
    }
    lines
}

pub async fn run_status(
    store: &SyncStore,
    settings: &SyncSettings,
    as_json: bool,
) -> Result<(), CliError> {
    let report = collect_status(store, settings).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for line in format_status_lines(&report) {
        println!("{line}");
    }
    Ok(())
}
