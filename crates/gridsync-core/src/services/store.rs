//! Shared durable store service used by the orchestrator and clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::db::{
    ConflictRepository, ConflictResolution, Database, EscalationReason, PhotoRepository,
    QueueRepository, SqliteConflictRepository, SqlitePhotoRepository, SqliteQueueRepository,
    SyncCounters,
};
use crate::models::{
    BlobRef, ConflictId, EntityType, LocalSyncConflict, PhotoUploadQueueItem, QueueItemId,
    QueueStatus, ResolutionStrategy, SyncQueueItem,
};
use crate::Result;

/// Queue and conflict totals read in one consistent view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    /// Items waiting for their first or next replay (`pending` or `syncing`)
    pub pending: usize,
    /// Items whose last replay failed
    pub failed: usize,
    /// Photo items not yet uploaded
    pub pending_photos: usize,
    /// Time-entry items not yet replayed
    pub pending_time_entries: usize,
    /// Unresolved conflicts
    pub conflicts: usize,
    /// Last fully successful pass, persisted across restarts
    pub last_synced_at: Option<i64>,
}

/// Thread-safe service over the durable local store.
#[derive(Clone)]
pub struct SyncStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl SyncStore {
    /// Open the store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        tracing::debug!("Opened sync store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Path of the backing file, if any.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Items moved from `syncing` back to `pending` when the store opened.
    pub async fn reclassified_on_open(&self) -> usize {
        self.db.lock().await.reclassified_on_open()
    }

    /// Durably record a local mutation as `pending`.
    pub async fn enqueue(&self, item: SyncQueueItem) -> Result<SyncQueueItem> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).insert(&item)?;
        tracing::debug!(
            "Queued {} {} for {} ({})",
            item.operation,
            item.entity_type,
            item.entity_id,
            item.id
        );
        Ok(item)
    }

    /// Durably record a photo and its blob as one `pending` upload.
    pub async fn enqueue_photo(
        &self,
        photo: PhotoUploadQueueItem,
        bytes: &[u8],
    ) -> Result<PhotoUploadQueueItem> {
        let db = self.db.lock().await;
        SqlitePhotoRepository::new(db.connection()).enqueue(&photo, bytes)?;
        tracing::debug!(
            "Queued {} photo for {} {} ({} bytes)",
            photo.photo_type,
            photo.parent_entity_type,
            photo.parent_entity_id,
            photo.size_bytes
        );
        Ok(photo)
    }

    /// Fetch a queue item by id.
    pub async fn get_item(&self, id: &QueueItemId) -> Result<Option<SyncQueueItem>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).get(id)
    }

    /// `pending` items, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<SyncQueueItem>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).list_pending()
    }

    /// `failed` items, oldest first.
    pub async fn list_failed(&self) -> Result<Vec<SyncQueueItem>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).list_failed()
    }

    /// Every item not yet `synced`, oldest first.
    pub async fn list_active(&self) -> Result<Vec<SyncQueueItem>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).list_active()
    }

    /// Non-photo items eligible for replay under the given budget.
    pub async fn list_replayable(&self, retry_budget: u32) -> Result<Vec<SyncQueueItem>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).list_replayable(retry_budget)
    }

    /// Photo items eligible for upload under the given budget.
    pub async fn list_replayable_photos(
        &self,
        retry_budget: u32,
    ) -> Result<Vec<PhotoUploadQueueItem>> {
        let db = self.db.lock().await;
        SqlitePhotoRepository::new(db.connection()).list_replayable(retry_budget)
    }

    /// Fetch a queued photo by its queue item id.
    pub async fn get_photo(&self, id: &QueueItemId) -> Result<Option<PhotoUploadQueueItem>> {
        let db = self.db.lock().await;
        SqlitePhotoRepository::new(db.connection()).get(id)
    }

    pub async fn mark_syncing(&self, id: &QueueItemId) -> Result<SyncQueueItem> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).mark_syncing(id)
    }

    pub async fn mark_synced(&self, id: &QueueItemId) -> Result<SyncQueueItem> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).mark_synced(id)
    }

    pub async fn mark_failed(&self, id: &QueueItemId, error: &str) -> Result<SyncQueueItem> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).mark_failed(id, error)
    }

    /// Reset a `failed` item to `pending` for another attempt.
    pub async fn retry_item(&self, id: &QueueItemId) -> Result<SyncQueueItem> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).retry(id)
    }

    /// Count items of an entity type still waiting on the remote.
    pub async fn count_pending_by_entity(&self, entity_type: EntityType) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).count_pending_by_entity(entity_type)
    }

    /// Promote an exhausted `failed` item to a conflict.
    pub async fn create_conflict(
        &self,
        id: &QueueItemId,
        retry_budget: u32,
    ) -> Result<LocalSyncConflict> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).create_from_queue_item(id, retry_budget)
    }

    /// Fail an item at full budget and promote it to a conflict atomically.
    pub async fn escalate(
        &self,
        id: &QueueItemId,
        reason: EscalationReason,
        retry_budget: u32,
    ) -> Result<LocalSyncConflict> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).escalate(id, reason, retry_budget)
    }

    /// Promote every exhausted item.
    pub async fn escalate_exhausted(&self, retry_budget: u32) -> Result<Vec<LocalSyncConflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).escalate_exhausted(retry_budget)
    }

    pub async fn get_conflict(&self, id: &ConflictId) -> Result<Option<LocalSyncConflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).get(id)
    }

    /// Unresolved conflicts, newest first.
    pub async fn list_unresolved_conflicts(&self) -> Result<Vec<LocalSyncConflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list_unresolved()
    }

    /// All conflicts including resolved ones, newest first.
    pub async fn list_all_conflicts(&self) -> Result<Vec<LocalSyncConflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list_all()
    }

    /// Settle a conflict.
    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        payload: Option<Value>,
    ) -> Result<ConflictResolution> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).resolve(id, strategy, payload)
    }

    pub async fn has_uploaded_duplicate(&self, photo: &PhotoUploadQueueItem) -> Result<bool> {
        let db = self.db.lock().await;
        SqlitePhotoRepository::new(db.connection()).has_uploaded_duplicate(photo)
    }

    pub async fn load_blob(&self, blob_ref: &BlobRef) -> Result<Vec<u8>> {
        let db = self.db.lock().await;
        SqlitePhotoRepository::new(db.connection()).load_blob(blob_ref)
    }

    /// Mark a photo uploaded (or skipped as duplicate) and release its blob.
    pub async fn mark_photo_uploaded(
        &self,
        id: &QueueItemId,
        duplicate: bool,
    ) -> Result<PhotoUploadQueueItem> {
        let db = self.db.lock().await;
        SqlitePhotoRepository::new(db.connection()).mark_uploaded(id, duplicate)
    }

    /// Delete `synced` rows. Lifetime counters and the photo dedup ledger survive.
    pub async fn prune_synced(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).prune_synced()
    }

    /// Lifetime counters.
    pub async fn counters(&self) -> Result<SyncCounters> {
        let db = self.db.lock().await;
        crate::db::load_counters(db.connection())
    }

    /// Persist the completion time of a fully successful pass.
    pub async fn record_last_synced_at(&self, timestamp: i64) -> Result<()> {
        let db = self.db.lock().await;
        crate::db::record_last_synced_at(db.connection(), timestamp)
    }

    /// Read every count the snapshot needs under a single lock.
    pub async fn counts(&self) -> Result<StoreCounts> {
        let db = self.db.lock().await;
        let queue = SqliteQueueRepository::new(db.connection());
        let conflicts = SqliteConflictRepository::new(db.connection());

        Ok(StoreCounts {
            pending: queue.count_by_status(QueueStatus::Pending)?
                + queue.count_by_status(QueueStatus::Syncing)?,
            failed: queue.count_by_status(QueueStatus::Failed)?,
            pending_photos: queue.count_pending_by_entity(EntityType::Photo)?,
            pending_time_entries: queue.count_pending_by_entity(EntityType::TimeEntry)?,
            conflicts: conflicts.count_unresolved()?,
            last_synced_at: crate::db::load_counters(db.connection())?.last_synced_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Operation;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn time_entry(id: &str) -> SyncQueueItem {
        SyncQueueItem::new(
            EntityType::TimeEntry,
            id,
            Operation::Update,
            json!({"clock_out": "2026-10-18T17:00:00Z"}),
        )
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_and_count() {
        let store = SyncStore::open_in_memory().await.unwrap();

        store.enqueue(time_entry("te-1")).await.unwrap();
        store.enqueue(time_entry("te-2")).await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(
            counts,
            StoreCounts {
                pending: 2,
                pending_time_entries: 2,
                ..StoreCounts::default()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_path_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("gridsync.db");

        let store = SyncStore::open_path(&db_path).await.unwrap();
        store.enqueue(time_entry("te-1")).await.unwrap();

        assert!(db_path.exists());
        assert_eq!(store.db_path(), Some(db_path.as_path()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_queue_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("gridsync.db");

        let queued = {
            let store = SyncStore::open_path(&db_path).await.unwrap();
            store.enqueue(time_entry("te-1")).await.unwrap()
        };

        let reopened = SyncStore::open_path(&db_path).await.unwrap();
        assert_eq!(reopened.list_pending().await.unwrap(), vec![queued]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_counts_track_failures_and_conflicts() {
        let store = SyncStore::open_in_memory().await.unwrap();
        let item = store.enqueue(time_entry("te-1")).await.unwrap();

        store.mark_syncing(&item.id).await.unwrap();
        store.mark_failed(&item.id, "timeout").await.unwrap();
        let counts = store.counts().await.unwrap();
        assert_eq!((counts.pending, counts.failed), (0, 1));
        assert_eq!(counts.pending_time_entries, 1);

        store
            .escalate(&item.id, EscalationReason::Operator, 3)
            .await
            .unwrap();
        let counts = store.counts().await.unwrap();
        assert_eq!((counts.failed, counts.conflicts), (0, 1));
        assert_eq!(store.counters().await.unwrap().conflicts_total, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_last_synced_at_persists() {
        let store = SyncStore::open_in_memory().await.unwrap();
        assert_eq!(store.counts().await.unwrap().last_synced_at, None);

        store.record_last_synced_at(1_760_000_000_000).await.unwrap();
        assert_eq!(
            store.counts().await.unwrap().last_synced_at,
            Some(1_760_000_000_000)
        );
    }
}
