//! Photo upload queue with duplicate suppression.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::{bounded, is_stale, prepare_photo, settle_failure};
use crate::config::PhotoCompression;
use crate::db::EscalationReason;
use crate::error::Error;
use crate::models::{CapturedPhoto, PhotoUploadQueueItem, QueueItemId};
use crate::remote::RemoteEndpoint;
use crate::services::SyncStore;
use crate::Result;

/// Tally of one upload pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Photos marked synced without an upload because the parent already has them
    pub duplicates: usize,
    /// One entry per failed photo, in processing order
    pub errors: Vec<PhotoUploadError>,
}

/// Why a photo did not upload during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUploadError {
    pub photo_id: QueueItemId,
    pub message: String,
}

enum UploadOutcome {
    Uploaded,
    Failed(String),
    /// The item left `syncing` while the upload was in flight
    Changed,
}

/// Queues captured photos and uploads them.
pub struct PhotoUploadQueue<R> {
    store: SyncStore,
    remote: Arc<R>,
    retry_budget: u32,
    timeout: Duration,
    compression: PhotoCompression,
}

impl<R: RemoteEndpoint> PhotoUploadQueue<R> {
    pub const fn new(
        store: SyncStore,
        remote: Arc<R>,
        retry_budget: u32,
        timeout: Duration,
        compression: PhotoCompression,
    ) -> Self {
        Self {
            store,
            remote,
            retry_budget,
            timeout,
            compression,
        }
    }

    /// Compress (when oversized) and durably queue a captured photo.
    ///
    /// The content hash is taken over the captured bytes, so the same capture
    /// queued twice is recognised as a duplicate whatever the encoder does.
    pub async fn add(&self, capture: CapturedPhoto) -> Result<PhotoUploadQueueItem> {
        enqueue_captured_photo(&self.store, &capture, self.compression).await
    }

    /// Upload every eligible photo once, oldest first.
    ///
    /// A failing photo never stops the rest of the batch; only store errors
    /// abort the pass.
    pub async fn process(&self) -> Result<ProcessSummary> {
        let mut summary = ProcessSummary::default();

        for photo in self.store.list_replayable_photos(self.retry_budget).await? {
            match self.store.mark_syncing(&photo.item.id).await {
                Ok(_) => {}
                Err(error) if is_stale(&error) => {
                    tracing::debug!("Skipping photo {}: {error}", photo.item.id);
                    continue;
                }
                Err(error) => return Err(error),
            }

            if self.store.has_uploaded_duplicate(&photo).await? {
                match self.store.mark_photo_uploaded(&photo.item.id, true).await {
                    Ok(_) => {}
                    Err(error) if is_stale(&error) => {
                        tracing::debug!("Photo {} changed during the pass: {error}", photo.item.id);
                        continue;
                    }
                    Err(error) => return Err(error),
                }
                summary.duplicates += 1;
                tracing::debug!(
                    "Skipped duplicate photo {} for {} {}",
                    photo.item.id,
                    photo.parent_entity_type,
                    photo.parent_entity_id
                );
                continue;
            }

            match self.upload(&photo).await? {
                UploadOutcome::Uploaded => summary.succeeded += 1,
                UploadOutcome::Failed(message) => {
                    summary.failed += 1;
                    summary.errors.push(PhotoUploadError {
                        photo_id: photo.item.id,
                        message,
                    });
                }
                UploadOutcome::Changed => {}
            }
        }

        if summary != ProcessSummary::default() {
            tracing::info!(
                "Photo pass: {} uploaded, {} failed, {} duplicates",
                summary.succeeded,
                summary.failed,
                summary.duplicates
            );
        }
        Ok(summary)
    }

    async fn upload(&self, photo: &PhotoUploadQueueItem) -> Result<UploadOutcome> {
        let id = &photo.item.id;
        let bytes = match &photo.blob_ref {
            Some(blob_ref) => match self.store.load_blob(blob_ref).await {
                Ok(bytes) => Some(bytes),
                Err(Error::NotFound(_)) => None,
                Err(error) => return Err(error),
            },
            None => None,
        };

        let Some(bytes) = bytes else {
            tracing::warn!("Photo {id} has no stored image; moving it to conflicts");
            let message = MISSING_BLOB.to_string();
            let escalated = self
                .store
                .escalate(
                    id,
                    EscalationReason::PermanentFailure(message.clone()),
                    self.retry_budget,
                )
                .await;
            return settled(id, escalated.map(|_| ()), UploadOutcome::Failed(message));
        };

        match bounded(self.timeout, self.remote.upload_photo(photo, &bytes)).await {
            Ok(_) => {
                let marked = self.store.mark_photo_uploaded(id, false).await;
                settled(id, marked.map(|_| ()), UploadOutcome::Uploaded)
            }
            Err(error) => {
                tracing::warn!(
                    "Upload of photo {id} for {} {} failed: {error}",
                    photo.parent_entity_type,
                    photo.parent_entity_id
                );
                let message = error.to_string();
                let result = settle_failure(&self.store, id, error, self.retry_budget).await;
                settled(id, result, UploadOutcome::Failed(message))
            }
        }
    }
}

const MISSING_BLOB: &str = "Photo blob is missing";

/// Map the result of settling a photo onto the pass outcome. An item that was
/// retried, resolved or escalated elsewhere mid-upload is skipped, not fatal.
fn settled(id: &QueueItemId, result: Result<()>, outcome: UploadOutcome) -> Result<UploadOutcome> {
    match result {
        Ok(()) => Ok(outcome),
        Err(error) if is_stale(&error) => {
            tracing::debug!("Photo {id} changed during upload: {error}");
            Ok(UploadOutcome::Changed)
        }
        Err(error) => Err(error),
    }
}

/// Compress a capture when oversized and queue it, without needing a remote.
pub async fn enqueue_captured_photo(
    store: &SyncStore,
    capture: &CapturedPhoto,
    compression: PhotoCompression,
) -> Result<PhotoUploadQueueItem> {
    let prepared = prepare_photo(&capture.bytes, &capture.mime_type, compression);
    let photo = PhotoUploadQueueItem::from_capture(
        capture,
        prepared.mime_type,
        prepared.bytes.len(),
        prepared.compressed,
    )?;
    store.enqueue_photo(photo, &prepared.bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, PhotoType, QueueStatus};
    use crate::sync::testing::{rejected, transient, FakeRemote, SettlesDuringCall};
    use pretty_assertions::assert_eq;

    fn capture(parent: &str, bytes: &[u8]) -> CapturedPhoto {
        CapturedPhoto::new(
            EntityType::Ticket,
            parent,
            PhotoType::Damage,
            "image/jpeg",
            bytes.to_vec(),
        )
        .unwrap()
    }

    async fn queue(remote: &Arc<FakeRemote>) -> (SyncStore, PhotoUploadQueue<FakeRemote>) {
        let store = SyncStore::open_in_memory().await.unwrap();
        let queue = PhotoUploadQueue::new(
            store.clone(),
            Arc::clone(remote),
            3,
            Duration::from_secs(5),
            PhotoCompression::default(),
        );
        (store, queue)
    }

    #[tokio::test]
    async fn add_keeps_small_photos_as_captured() {
        let remote = Arc::new(FakeRemote::new());
        let (store, queue) = queue(&remote).await;

        let photo = queue.add(capture("ticket-1", b"small jpeg")).await.unwrap();
        assert!(!photo.compressed);
        assert_eq!(photo.size_bytes, 10);
        assert_eq!(photo.item.status, QueueStatus::Pending);

        let blob_ref = photo.blob_ref.as_ref().unwrap();
        assert_eq!(store.load_blob(blob_ref).await.unwrap(), b"small jpeg");
    }

    #[tokio::test]
    async fn process_uploads_then_is_idempotent() {
        let remote = Arc::new(FakeRemote::new());
        let (_store, queue) = queue(&remote).await;
        queue.add(capture("ticket-1", b"one")).await.unwrap();
        queue.add(capture("ticket-2", b"two")).await.unwrap();

        let first = queue.process().await.unwrap();
        assert_eq!(
            first,
            ProcessSummary {
                succeeded: 2,
                failed: 0,
                duplicates: 0,
                errors: Vec::new(),
            }
        );

        let second = queue.process().await.unwrap();
        assert_eq!(second, ProcessSummary::default());
        assert_eq!(remote.calls(), vec!["ticket-1", "ticket-2"]);
    }

    #[tokio::test]
    async fn duplicate_for_same_parent_skips_network() {
        let remote = Arc::new(FakeRemote::new());
        let (store, queue) = queue(&remote).await;
        queue.add(capture("ticket-1", b"same bytes")).await.unwrap();
        let second = queue.add(capture("ticket-1", b"same bytes")).await.unwrap();

        let summary = queue.process().await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(remote.calls(), vec!["ticket-1"]);

        let stored = store.get_photo(&second.item.id).await.unwrap().unwrap();
        assert!(stored.is_duplicate);
        assert_eq!(stored.item.status, QueueStatus::Synced);
        assert_eq!(stored.blob_ref, None);
    }

    #[tokio::test]
    async fn same_bytes_for_other_parent_still_uploads() {
        let remote = Arc::new(FakeRemote::new());
        let (_store, queue) = queue(&remote).await;
        queue.add(capture("ticket-1", b"same bytes")).await.unwrap();
        queue.add(capture("ticket-2", b"same bytes")).await.unwrap();

        let summary = queue.process().await.unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.duplicates, 0);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_the_batch() {
        let remote = Arc::new(FakeRemote::new());
        remote.script("ticket-1", vec![transient("connection reset")]);
        let (store, queue) = queue(&remote).await;
        let failing = queue.add(capture("ticket-1", b"one")).await.unwrap();
        queue.add(capture("ticket-2", b"two")).await.unwrap();

        let summary = queue.process().await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.errors,
            vec![PhotoUploadError {
                photo_id: failing.item.id,
                message: "Transient network error: connection reset".to_string(),
            }]
        );

        let stored = store.get_item(&failing.item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Failed);
        assert_eq!(stored.attempt_count, 1);

        // The failed photo is retried on the next pass.
        let retry = queue.process().await.unwrap();
        assert_eq!(retry.succeeded, 1);
    }

    #[tokio::test]
    async fn permanent_failure_escalates_after_one_attempt() {
        let remote = Arc::new(FakeRemote::new());
        remote.script("ticket-1", vec![rejected("unsupported image")]);
        let (store, queue) = queue(&remote).await;
        let photo = queue.add(capture("ticket-1", b"bmp")).await.unwrap();

        let summary = queue.process().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(remote.calls().len(), 1);
        assert!(store.get_item(&photo.item.id).await.unwrap().is_none());

        let conflicts = store.list_unresolved_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].entity_type, EntityType::Photo);

        assert_eq!(queue.process().await.unwrap(), ProcessSummary::default());
    }

    #[tokio::test]
    async fn photo_settled_mid_upload_does_not_abort_the_pass() {
        let store = SyncStore::open_in_memory().await.unwrap();
        let remote = Arc::new(SettlesDuringCall::new(store.clone(), "ticket-1"));
        let queue = PhotoUploadQueue::new(
            store.clone(),
            Arc::clone(&remote),
            3,
            Duration::from_secs(5),
            PhotoCompression::default(),
        );
        let first = queue.add(capture("ticket-1", b"one")).await.unwrap();
        queue.add(capture("ticket-2", b"two")).await.unwrap();

        let summary = queue.process().await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 0);
        assert!(summary.errors.is_empty());
        assert_eq!(remote.calls(), vec!["ticket-1", "ticket-2"]);

        let first = store.get_item(&first.item.id).await.unwrap().unwrap();
        assert_eq!(first.status, QueueStatus::Synced);
        assert_eq!(first.attempt_count, 0);
    }
}
