//! Photo blob and upload metadata storage

use rusqlite::{params, Connection, OptionalExtension};

use super::queue_repository::{
    apply_transition, insert_item, parse_item, Transition, QUEUE_COLUMNS,
};
use super::{counters, parse_column, parse_optional_column};
use crate::error::{Error, Result};
use crate::models::{BlobRef, GeoPoint, PhotoUploadQueueItem, QueueItemId};
use crate::util::unix_millis_now;

const PHOTO_SELECT: &str = "blob_ref, parent_entity_type, parent_entity_id, photo_type, \
     mime_type, size_bytes, content_hash, compressed, is_duplicate, uploaded_at, \
     gps_latitude, gps_longitude FROM sync_queue q JOIN photo_uploads p ON p.queue_item_id = q.id";

/// Trait for photo upload storage operations
pub trait PhotoRepository {
    /// Store the blob and its queue item in one transaction
    fn enqueue(&self, photo: &PhotoUploadQueueItem, bytes: &[u8]) -> Result<()>;

    /// Get a queued photo by its queue item ID
    fn get(&self, id: &QueueItemId) -> Result<Option<PhotoUploadQueueItem>>;

    /// Photos a processing pass may upload, oldest first
    fn list_replayable(&self, retry_budget: u32) -> Result<Vec<PhotoUploadQueueItem>>;

    /// Load the bytes behind a blob reference
    fn load_blob(&self, blob_ref: &BlobRef) -> Result<Vec<u8>>;

    /// Whether another photo with the same hash was already uploaded for this parent
    fn has_uploaded_duplicate(&self, photo: &PhotoUploadQueueItem) -> Result<bool>;

    /// Mark the photo `synced` and release its local blob
    fn mark_uploaded(&self, id: &QueueItemId, duplicate: bool) -> Result<PhotoUploadQueueItem>;
}

/// `SQLite` implementation of `PhotoRepository`
pub struct SqlitePhotoRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePhotoRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl PhotoRepository for SqlitePhotoRepository<'_> {
    fn enqueue(&self, photo: &PhotoUploadQueueItem, bytes: &[u8]) -> Result<()> {
        let blob_ref = photo
            .blob_ref
            .ok_or_else(|| Error::InvalidInput("Queued photo needs a blob".to_string()))?;

        let tx = self.conn.unchecked_transaction()?;
        insert_item(&tx, &photo.item)?;
        tx.execute(
            "INSERT INTO photo_blobs (blob_ref, bytes, created_at) VALUES (?1, ?2, ?3)",
            params![blob_ref.as_str(), bytes, photo.item.created_at],
        )?;
        tx.execute(
            "INSERT INTO photo_uploads (queue_item_id, blob_ref, parent_entity_type, parent_entity_id, photo_type, mime_type, size_bytes, content_hash, compressed, is_duplicate, uploaded_at, gps_latitude, gps_longitude)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, NULL, ?10, ?11)",
            params![
                photo.item.id.as_str(),
                blob_ref.as_str(),
                photo.parent_entity_type.as_str(),
                photo.parent_entity_id,
                photo.photo_type.as_str(),
                photo.mime_type,
                photo.size_bytes,
                photo.content_hash,
                i32::from(photo.compressed),
                photo.location.map(|point| point.latitude),
                photo.location.map(|point| point.longitude),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: &QueueItemId) -> Result<Option<PhotoUploadQueueItem>> {
        fetch_photo(self.conn, id)
    }

    fn list_replayable(&self, retry_budget: u32) -> Result<Vec<PhotoUploadQueueItem>> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS}, {PHOTO_SELECT}
             WHERE q.status = 'pending' OR (q.status = 'failed' AND q.attempt_count < ?1)
             ORDER BY q.created_at ASC, q.rowid ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let photos = stmt
            .query_map(params![retry_budget], parse_photo)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(photos)
    }

    fn load_blob(&self, blob_ref: &BlobRef) -> Result<Vec<u8>> {
        self.conn
            .query_row(
                "SELECT bytes FROM photo_blobs WHERE blob_ref = ?1",
                params![blob_ref.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("Photo blob {blob_ref}")))
    }

    fn has_uploaded_duplicate(&self, photo: &PhotoUploadQueueItem) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM photo_uploads
                WHERE parent_entity_type = ?1
                  AND parent_entity_id = ?2
                  AND content_hash = ?3
                  AND uploaded_at IS NOT NULL
                  AND queue_item_id != ?4
            )",
            params![
                photo.parent_entity_type.as_str(),
                photo.parent_entity_id,
                photo.content_hash,
                photo.item.id.as_str(),
            ],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn mark_uploaded(&self, id: &QueueItemId, duplicate: bool) -> Result<PhotoUploadQueueItem> {
        let tx = self.conn.unchecked_transaction()?;

        apply_transition(&tx, id, Transition::Synced)?;
        let blob_ref: Option<String> = tx
            .query_row(
                "SELECT blob_ref FROM photo_uploads WHERE queue_item_id = ?1",
                params![id.as_str()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();

        tx.execute(
            "UPDATE photo_uploads SET uploaded_at = ?1, is_duplicate = ?2, blob_ref = NULL
             WHERE queue_item_id = ?3",
            params![unix_millis_now(), i32::from(duplicate), id.as_str()],
        )?;
        if let Some(blob_ref) = blob_ref {
            tx.execute(
                "DELETE FROM photo_blobs WHERE blob_ref = ?1",
                params![blob_ref],
            )?;
        }
        if duplicate {
            counters::increment(&tx, counters::DUPLICATES_TOTAL, 1)?;
        }

        let photo =
            fetch_photo(&tx, id)?.ok_or_else(|| Error::NotFound(format!("Photo upload {id}")))?;
        tx.commit()?;
        Ok(photo)
    }
}

/// Drop the upload row and blob of a photo whose local change was discarded.
pub(super) fn discard_upload(conn: &Connection, queue_item_id: &QueueItemId) -> Result<()> {
    let blob_ref: Option<String> = conn
        .query_row(
            "SELECT blob_ref FROM photo_uploads WHERE queue_item_id = ?1",
            params![queue_item_id.as_str()],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten();

    conn.execute(
        "DELETE FROM photo_uploads WHERE queue_item_id = ?1",
        params![queue_item_id.as_str()],
    )?;
    if let Some(blob_ref) = blob_ref {
        conn.execute(
            "DELETE FROM photo_blobs WHERE blob_ref = ?1",
            params![blob_ref],
        )?;
        tracing::debug!("Released photo blob {blob_ref}");
    }
    Ok(())
}

/// Hand a photo's upload row and blob over to a re-enqueued queue item.
pub(super) fn reassign_upload(conn: &Connection, from: &QueueItemId, to: &QueueItemId) -> Result<()> {
    conn.execute(
        "UPDATE photo_uploads SET queue_item_id = ?1 WHERE queue_item_id = ?2",
        params![to.as_str(), from.as_str()],
    )?;
    Ok(())
}

fn fetch_photo(conn: &Connection, id: &QueueItemId) -> Result<Option<PhotoUploadQueueItem>> {
    let photo = conn
        .query_row(
            &format!("SELECT {QUEUE_COLUMNS}, {PHOTO_SELECT} WHERE q.id = ?1"),
            params![id.as_str()],
            parse_photo,
        )
        .optional()?;
    Ok(photo)
}

fn parse_photo(row: &rusqlite::Row<'_>) -> rusqlite::Result<PhotoUploadQueueItem> {
    Ok(PhotoUploadQueueItem {
        item: parse_item(row)?,
        blob_ref: parse_optional_column(row, 10)?,
        parent_entity_type: parse_column(row, 11)?,
        parent_entity_id: row.get(12)?,
        photo_type: parse_column(row, 13)?,
        mime_type: row.get(14)?,
        size_bytes: row.get(15)?,
        content_hash: row.get(16)?,
        compressed: row.get::<_, i32>(17)? != 0,
        is_duplicate: row.get::<_, i32>(18)? != 0,
        uploaded_at: row.get(19)?,
        location: match (row.get::<_, Option<f64>>(20)?, row.get::<_, Option<f64>>(21)?) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
            }),
            _ => None,
        },
    })
}
