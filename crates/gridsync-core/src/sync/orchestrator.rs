//! Sync orchestrator: the two-state machine that drives queue processing.
//!
//! A pass escalates exhausted items, replays mutations, uploads photos and
//! prunes what synced. Passes never overlap; a trigger that arrives while one
//! is running is coalesced into it. Consumers observe the orchestrator
//! through [`SyncSnapshot`] values published on a watch channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{
    BackgroundSyncRegistrar, PhotoUploadQueue, ProcessSummary, ReplayProcessor, ReplaySummary,
};
use crate::config::SyncSettings;
use crate::db::{ConflictResolution, EscalationReason};
use crate::models::{
    CapturedPhoto, ConflictId, LocalSyncConflict, PhotoUploadQueueItem, QueueItemId,
    ResolutionStrategy, SyncQueueItem,
};
use crate::remote::RemoteEndpoint;
use crate::services::SyncStore;
use crate::state::SyncState;
use crate::util::unix_millis_now;
use crate::Result;

/// Recorded when a sync is requested without connectivity.
pub const OFFLINE_MESSAGE: &str = "Cannot sync while offline.";

/// Prefix of host messages that ask for a sync.
const SYNC_MESSAGE_PREFIX: &str = "SYNC_";

/// Everything a consumer needs to render sync status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub is_online: bool,
    pub sync_state: SyncState,
    /// Items in `pending` or `syncing`
    pub pending_count: usize,
    pub failed_count: usize,
    pub pending_photo_count: usize,
    pub pending_time_entry_count: usize,
    /// Unresolved conflicts
    pub conflict_count: usize,
    pub last_synced_at: Option<i64>,
    pub last_error: Option<String>,
}

/// Totals for one full pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    /// Exhausted items promoted before replay started
    pub escalated: usize,
    pub replay: ReplaySummary,
    pub photos: ProcessSummary,
    /// Synced rows removed from the queue afterwards
    pub pruned: usize,
}

impl PassSummary {
    /// Items that did not make it to the remote during this pass.
    pub const fn failed(&self) -> usize {
        self.replay.failed + self.replay.escalated + self.photos.failed
    }
}

/// What a call to [`SyncOrchestrator::sync_now`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(PassSummary),
    /// Another pass was already running
    Coalesced,
    Offline,
}

/// Signals from the host platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    Online,
    Offline,
    /// Message posted by the background worker, e.g. `SYNC_TIME_ENTRIES`
    Message(String),
    /// Periodic refresh
    Tick,
}

/// Clears the syncing flag when dropped, including on error or cancellation.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives queue processing and publishes sync status.
pub struct SyncOrchestrator<R> {
    store: SyncStore,
    replay: ReplayProcessor<R>,
    photos: PhotoUploadQueue<R>,
    retry_budget: u32,
    registrar: Option<BackgroundSyncRegistrar>,
    online: AtomicBool,
    syncing: AtomicBool,
    last_error: Mutex<Option<String>>,
    snapshot_tx: watch::Sender<SyncSnapshot>,
}

impl<R: RemoteEndpoint> SyncOrchestrator<R> {
    /// Build an orchestrator that starts out online.
    pub fn new(store: SyncStore, remote: Arc<R>, settings: &SyncSettings) -> Self {
        let timeout = settings.request_timeout();
        let (snapshot_tx, _) = watch::channel(SyncSnapshot {
            is_online: true,
            ..SyncSnapshot::default()
        });

        Self {
            replay: ReplayProcessor::new(
                store.clone(),
                Arc::clone(&remote),
                settings.retry_budget,
                timeout,
            ),
            photos: PhotoUploadQueue::new(
                store.clone(),
                remote,
                settings.retry_budget,
                timeout,
                settings.photo_compression,
            ),
            store,
            retry_budget: settings.retry_budget,
            registrar: None,
            online: AtomicBool::new(true),
            syncing: AtomicBool::new(false),
            last_error: Mutex::new(None),
            snapshot_tx,
        }
    }

    #[must_use]
    pub fn with_registrar(mut self, registrar: BackgroundSyncRegistrar) -> Self {
        self.registrar = Some(registrar);
        self
    }

    #[must_use]
    pub fn with_online(self, online: bool) -> Self {
        self.online.store(online, Ordering::Release);
        self
    }

    pub const fn store(&self) -> &SyncStore {
        &self.store
    }

    pub const fn photos(&self) -> &PhotoUploadQueue<R> {
        &self.photos
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Register background sync (when a registrar is attached) and publish
    /// the first snapshot. Returns the registered tags.
    pub async fn start(&self) -> Result<Vec<String>> {
        let tags = match &self.registrar {
            Some(registrar) => registrar.start().await,
            None => Vec::new(),
        };
        self.refresh().await?;
        Ok(tags)
    }

    /// Run one pass unless offline or a pass is already running.
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        if !self.is_online() {
            *self.last_error.lock().await = Some(OFFLINE_MESSAGE.to_string());
            self.refresh().await?;
            return Ok(SyncOutcome::Offline);
        }

        let Some(guard) = PassGuard::acquire(&self.syncing) else {
            tracing::debug!("Sync pass already running; coalescing trigger");
            return Ok(SyncOutcome::Coalesced);
        };

        *self.last_error.lock().await = None;
        let result = match self.refresh().await {
            Ok(_) => self.run_pass().await,
            Err(error) => Err(error),
        };
        drop(guard);

        match &result {
            Ok(summary) => self.record_pass(summary).await?,
            Err(error) => {
                tracing::error!("Sync pass failed: {error}");
                *self.last_error.lock().await = Some(error.to_string());
            }
        }

        if let Err(error) = self.refresh().await {
            tracing::warn!("Failed to refresh sync snapshot: {error}");
            let last_error = self.last_error.lock().await.clone();
            self.snapshot_tx.send_modify(|snapshot| {
                snapshot.sync_state = SyncState::Idle;
                snapshot.last_error = last_error;
            });
        }
        result.map(SyncOutcome::Completed)
    }

    async fn run_pass(&self) -> Result<PassSummary> {
        let escalated = self.store.escalate_exhausted(self.retry_budget).await?.len();
        let replay = self.replay.process().await?;
        let photos = self.photos.process().await?;
        let pruned = self.store.prune_synced().await?;

        Ok(PassSummary {
            escalated,
            replay,
            photos,
            pruned,
        })
    }

    async fn record_pass(&self, summary: &PassSummary) -> Result<()> {
        let failed = summary.failed();
        if failed > 0 {
            *self.last_error.lock().await = Some(format!(
                "{failed} item(s) failed to sync. Review queue items for retry."
            ));
            return Ok(());
        }

        self.store.record_last_synced_at(unix_millis_now()).await?;
        tracing::info!(
            "Sync pass complete: {} mutations, {} photos, {} duplicates",
            summary.replay.succeeded,
            summary.photos.succeeded,
            summary.photos.duplicates
        );
        Ok(())
    }

    /// Re-derive the snapshot from the store and publish it.
    pub async fn refresh(&self) -> Result<SyncSnapshot> {
        let counts = self.store.counts().await?;
        let snapshot = SyncSnapshot {
            is_online: self.is_online(),
            sync_state: if self.is_syncing() {
                SyncState::Syncing
            } else {
                SyncState::Idle
            },
            pending_count: counts.pending,
            failed_count: counts.failed,
            pending_photo_count: counts.pending_photos,
            pending_time_entry_count: counts.pending_time_entries,
            conflict_count: counts.conflicts,
            last_synced_at: counts.last_synced_at,
            last_error: self.last_error.lock().await.clone(),
        };
        self.snapshot_tx.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Record a local mutation and publish the new counts.
    pub async fn enqueue(&self, item: SyncQueueItem) -> Result<SyncQueueItem> {
        let item = self.store.enqueue(item).await?;
        self.refresh().await?;
        Ok(item)
    }

    /// Queue a captured photo and publish the new counts.
    pub async fn add_photo(&self, capture: CapturedPhoto) -> Result<PhotoUploadQueueItem> {
        let photo = self.photos.add(capture).await?;
        self.refresh().await?;
        Ok(photo)
    }

    /// Items still waiting on the remote.
    pub async fn queue_items(&self) -> Result<Vec<SyncQueueItem>> {
        self.store.list_active().await
    }

    /// Unresolved conflicts, newest first.
    pub async fn conflicts(&self) -> Result<Vec<LocalSyncConflict>> {
        self.store.list_unresolved_conflicts().await
    }

    /// Put a failed item back in line and sync straight away when online.
    pub async fn retry_item(&self, id: &QueueItemId) -> Result<SyncQueueItem> {
        let item = self.store.retry_item(id).await?;
        self.refresh().await?;
        if self.is_online() {
            self.sync_now().await?;
        }
        Ok(item)
    }

    /// Give up on an item and hand it to an operator.
    pub async fn move_item_to_conflict(&self, id: &QueueItemId) -> Result<LocalSyncConflict> {
        let conflict = self
            .store
            .escalate(id, EscalationReason::Operator, self.retry_budget)
            .await?;
        self.refresh().await?;
        Ok(conflict)
    }

    pub async fn resolve_conflict_item(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        payload: Option<Value>,
    ) -> Result<ConflictResolution> {
        let resolution = self.store.resolve_conflict(id, strategy, payload).await?;
        self.refresh().await?;
        Ok(resolution)
    }

    /// React to one platform event.
    pub async fn handle(&self, event: PlatformEvent) -> Result<()> {
        match event {
            PlatformEvent::Online => {
                self.online.store(true, Ordering::Release);
                tracing::info!("Connectivity restored");
                if let Some(registrar) = &self.registrar {
                    registrar.on_online().await;
                }
                self.refresh().await?;
                self.sync_now().await?;
            }
            PlatformEvent::Offline => {
                self.online.store(false, Ordering::Release);
                tracing::info!("Connectivity lost");
                self.refresh().await?;
            }
            PlatformEvent::Tick => {
                let snapshot = self.refresh().await?;
                if snapshot.is_online && snapshot.pending_count + snapshot.failed_count > 0 {
                    self.sync_now().await?;
                }
            }
            PlatformEvent::Message(kind) => {
                if !kind.starts_with(SYNC_MESSAGE_PREFIX) {
                    tracing::debug!("Ignoring worker message {kind}");
                    return Ok(());
                }
                self.refresh().await?;
                if self.is_online() {
                    self.sync_now().await?;
                }
            }
        }
        Ok(())
    }

    /// Process events until every sender is dropped. Failures are logged and
    /// the loop keeps going.
    pub async fn run(&self, mut events: mpsc::Receiver<PlatformEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(error) = self.handle(event).await {
                tracing::error!("Sync event handling failed: {error}");
            }
        }
        tracing::debug!("Platform event channel closed");
    }
}

/// Send a [`PlatformEvent::Tick`] every `period` until the receiver is gone.
pub fn spawn_ticker(period: Duration, events: mpsc::Sender<PlatformEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if events.send(PlatformEvent::Tick).await.is_err() {
                break;
            }
        }
    })
}
