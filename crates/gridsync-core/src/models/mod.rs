//! Data models for gridsync

mod id;
mod photo;
mod queue_item;
mod sync_conflict;

pub use photo::{content_hash, BlobRef, CapturedPhoto, GeoPoint, PhotoType, PhotoUploadQueueItem};
pub use queue_item::{EntityType, Operation, QueueItemId, QueueStatus, SyncQueueItem};
pub use sync_conflict::{ConflictId, LocalSyncConflict, ResolutionStrategy};
