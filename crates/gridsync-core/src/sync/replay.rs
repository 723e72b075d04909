//! Replay of queued non-photo mutations.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::{bounded, is_stale, settle_failure};
use crate::models::{EntityType, QueueStatus, SyncQueueItem};
use crate::remote::{RemoteEndpoint, RemoteError};
use crate::services::SyncStore;
use crate::Result;

/// Tally of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub succeeded: usize,
    /// Transient failures left for a later pass
    pub failed: usize,
    /// Items promoted to conflicts during the pass
    pub escalated: usize,
}

/// Replays queued tickets, time entries, assessments and expenses in
/// creation order.
pub struct ReplayProcessor<R> {
    store: SyncStore,
    remote: Arc<R>,
    retry_budget: u32,
    timeout: Duration,
}

impl<R: RemoteEndpoint> ReplayProcessor<R> {
    pub const fn new(
        store: SyncStore,
        remote: Arc<R>,
        retry_budget: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            retry_budget,
            timeout,
        }
    }

    /// Replay every replayable item once, oldest first.
    ///
    /// Items are sent one at a time so a later mutation never reaches the
    /// remote before an earlier one. Once a mutation for an entity fails,
    /// later mutations for that entity wait for the next pass. A store
    /// failure aborts the pass; the item in flight is reclassified on the
    /// next open.
    pub async fn process(&self) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();
        let mut held_back: HashSet<(EntityType, String)> = HashSet::new();

        for item in self.store.list_replayable(self.retry_budget).await? {
            let entity = (item.entity_type, item.entity_id.clone());
            if held_back.contains(&entity) {
                tracing::debug!(
                    "Holding back queue item {} until earlier {} {} changes sync",
                    item.id,
                    item.entity_type,
                    item.entity_id
                );
                continue;
            }

            let item = match self.store.mark_syncing(&item.id).await {
                Ok(item) => item,
                Err(error) if is_stale(&error) => {
                    tracing::debug!("Skipping queue item {}: {error}", item.id);
                    continue;
                }
                Err(error) => return Err(error),
            };

            match bounded(self.timeout, self.remote.replay(&item)).await {
                Ok(_) => match self.store.mark_synced(&item.id).await {
                    Ok(_) => {
                        summary.succeeded += 1;
                        tracing::debug!(
                            "Replayed {} {} {}",
                            item.operation,
                            item.entity_type,
                            item.entity_id
                        );
                    }
                    Err(error) if is_stale(&error) => {
                        tracing::debug!("Queue item {} changed during replay: {error}", item.id);
                    }
                    Err(error) => return Err(error),
                },
                Err(error) => {
                    held_back.insert(entity);
                    let transient = error.is_transient();
                    match self.settle(&item, error).await {
                        Ok(()) => {}
                        Err(error) if is_stale(&error) => {
                            tracing::debug!(
                                "Queue item {} changed during replay: {error}",
                                item.id
                            );
                            continue;
                        }
                        Err(error) => return Err(error),
                    }
                    if transient && self.still_queued(&item).await? {
                        summary.failed += 1;
                    } else {
                        summary.escalated += 1;
                    }
                }
            }
        }

        if summary != ReplaySummary::default() {
            tracing::info!(
                "Replay pass: {} synced, {} failed, {} escalated",
                summary.succeeded,
                summary.failed,
                summary.escalated
            );
        }
        Ok(summary)
    }

    async fn settle(&self, item: &SyncQueueItem, error: RemoteError) -> Result<()> {
        tracing::warn!(
            "Replay of {} {} failed: {error}",
            item.entity_type,
            item.entity_id
        );
        settle_failure(&self.store, &item.id, error, self.retry_budget).await
    }

    async fn still_queued(&self, item: &SyncQueueItem) -> Result<bool> {
        Ok(self
            .store
            .get_item(&item.id)
            .await?
            .is_some_and(|current| current.status == QueueStatus::Failed))
    }
}
