use std::path::PathBuf;

use gridsync_core::config::SyncSettings;
use gridsync_core::models::{CapturedPhoto, GeoPoint, PhotoType, PhotoUploadQueueItem};
use gridsync_core::sync::enqueue_captured_photo;
use gridsync_core::util::unix_millis_now;
use gridsync_core::{EntityType, SyncStore};
use serde::Serialize;

use crate::commands::common::infer_mime_type;
use crate::error::CliError;

pub struct PhotoAddRequest {
    pub parent_type: EntityType,
    pub parent_id: String,
    pub path: PathBuf,
    pub photo_type: PhotoType,
    pub mime_type: Option<String>,
    /// Latitude and longitude in degrees
    pub location: Option<(f64, f64)>,
}

#[derive(Debug, Serialize)]
pub struct QueuedPhotoView {
    pub id: String,
    pub parent_entity_type: String,
    pub parent_entity_id: String,
    pub photo_type: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub compressed: bool,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

pub async fn run_photo_add(
    store: &SyncStore,
    settings: &SyncSettings,
    request: PhotoAddRequest,
    as_json: bool,
) -> Result<(), CliError> {
    let photo = queue_photo_file(store, settings, request).await?;
    let view = QueuedPhotoView {
        id: photo.item.id.as_str(),
        parent_entity_type: photo.parent_entity_type.to_string(),
        parent_entity_id: photo.parent_entity_id.clone(),
        photo_type: photo.photo_type.to_string(),
        mime_type: photo.mime_type.clone(),
        size_bytes: photo.size_bytes,
        compressed: photo.compressed,
        content_hash: photo.content_hash.clone(),
        location: photo.location,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else if view.compressed {
        println!("{} ({} bytes, compressed)", view.id, view.size_bytes);
    } else {
        println!("{} ({} bytes)", view.id, view.size_bytes);
    }
    Ok(())
}

/// Read an image file and queue it as a photo capture.
pub async fn queue_photo_file(
    store: &SyncStore,
    settings: &SyncSettings,
    request: PhotoAddRequest,
) -> Result<PhotoUploadQueueItem, CliError> {
    let mime_type = match request.mime_type {
        Some(mime_type) => mime_type,
        None => infer_mime_type(&request.path)
            .map(str::to_string)
            .ok_or_else(|| CliError::UnknownMimeType(request.path.display().to_string()))?,
    };

    let location = request
        .location
        .map(|(latitude, longitude)| GeoPoint::new(latitude, longitude))
        .transpose()?;

    let bytes = std::fs::read(&request.path)?;
    let mut capture = CapturedPhoto::new(
        request.parent_type,
        request.parent_id,
        request.photo_type,
        mime_type,
        bytes,
    )?
    .with_captured_at(unix_millis_now());
    if let Some(location) = location {
        capture = capture.with_location(location);
    }

    Ok(enqueue_captured_photo(store, &capture, settings.photo_compression).await?)
}
