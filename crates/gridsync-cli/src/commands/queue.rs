use gridsync_core::util::unix_millis_now;
use gridsync_core::SyncStore;

use crate::commands::common::{format_queue_lines, queue_item_to_view, QueueItemView};
use crate::error::CliError;

pub async fn run_queue(store: &SyncStore, retry_budget: u32, as_json: bool) -> Result<(), CliError> {
    let items = store.list_active().await?;

    if as_json {
        let now = unix_millis_now();
        let views = items
            .iter()
            .map(|item| queue_item_to_view(item, now))
            .collect::<Vec<QueueItemView>>();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_queue_lines(&items, retry_budget) {
        println!("{line}");
    }
    Ok(())
}
