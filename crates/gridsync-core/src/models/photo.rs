//! Photo upload queue item model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::id::uuid_id;
use super::queue_item::{EntityType, Operation, SyncQueueItem};
use crate::error::{Error, Result};

uuid_id!(
    /// Reference to a locally stored photo blob
    BlobRef
);

/// Assessment photo category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhotoType {
    Overview,
    Equipment,
    Damage,
    Safety,
    Context,
}

impl PhotoType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Overview => "OVERVIEW",
            Self::Equipment => "EQUIPMENT",
            Self::Damage => "DAMAGE",
            Self::Safety => "SAFETY",
            Self::Context => "CONTEXT",
        }
    }
}

impl fmt::Display for PhotoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhotoType {
    type Err = Error;

    /// Unknown categories fall back to `CONTEXT`.
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "OVERVIEW" => Self::Overview,
            "EQUIPMENT" => Self::Equipment,
            "DAMAGE" => Self::Damage,
            "SAFETY" => Self::Safety,
            _ => Self::Context,
        })
    }
}

/// Compute the hex-encoded SHA-256 content hash used for duplicate detection.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Where a photo was taken, in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::InvalidInput(format!(
                "GPS latitude {latitude} is outside -90..=90"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::InvalidInput(format!(
                "GPS longitude {longitude} is outside -180..=180"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// A photo as captured in the field, before it enters the upload queue.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPhoto {
    /// Kind of the entity the photo documents (usually a ticket)
    pub parent_entity_type: EntityType,
    /// Identifier of the documented entity
    pub parent_entity_id: String,
    /// Photo category
    pub photo_type: PhotoType,
    /// Content MIME type
    pub mime_type: String,
    /// Capture timestamp (Unix ms)
    pub captured_at: Option<i64>,
    /// Device position at capture, when the platform provided one
    pub location: Option<GeoPoint>,
    /// Raw image bytes
    pub bytes: Vec<u8>,
}

impl CapturedPhoto {
    /// Create a validated captured photo.
    pub fn new(
        parent_entity_type: EntityType,
        parent_entity_id: impl Into<String>,
        photo_type: PhotoType,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self> {
        let parent_entity_id = parent_entity_id.into().trim().to_string();
        let mime_type = mime_type.into().trim().to_string();

        if parent_entity_type == EntityType::Photo {
            return Err(Error::InvalidInput(
                "Photo parent entity cannot itself be a photo".to_string(),
            ));
        }
        if parent_entity_id.is_empty() {
            return Err(Error::InvalidInput(
                "Photo parent_entity_id cannot be empty".to_string(),
            ));
        }
        if mime_type.is_empty() {
            return Err(Error::InvalidInput(
                "Photo mime_type cannot be empty".to_string(),
            ));
        }
        if bytes.is_empty() {
            return Err(Error::InvalidInput("Photo bytes cannot be empty".to_string()));
        }

        Ok(Self {
            parent_entity_type,
            parent_entity_id,
            photo_type,
            mime_type,
            captured_at: None,
            location: None,
            bytes,
        })
    }

    /// Set the capture timestamp
    #[must_use]
    pub const fn with_captured_at(mut self, captured_at: i64) -> Self {
        self.captured_at = Some(captured_at);
        self
    }

    #[must_use]
    pub const fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }
}

/// Queue item specialization carrying a binary photo payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoUploadQueueItem {
    /// Underlying queue item (`entity_type` is always `photo`)
    pub item: SyncQueueItem,
    /// Local blob, owned by the queue until upload or abandonment
    pub blob_ref: Option<BlobRef>,
    /// Kind of the documented entity
    pub parent_entity_type: EntityType,
    /// Identifier of the documented entity
    pub parent_entity_id: String,
    /// Photo category
    pub photo_type: PhotoType,
    /// MIME type of the stored (possibly re-encoded) blob
    pub mime_type: String,
    /// Size of the stored blob in bytes
    pub size_bytes: i64,
    /// SHA-256 of the captured bytes, computed once at enqueue
    pub content_hash: String,
    /// Whether the blob was re-encoded before queueing
    pub compressed: bool,
    /// Set when the upload was skipped because the parent already has this photo
    pub is_duplicate: bool,
    /// Upload completion timestamp (Unix ms)
    pub uploaded_at: Option<i64>,
    /// Capture position
    pub location: Option<GeoPoint>,
}

impl PhotoUploadQueueItem {
    /// Build a pending photo item for a captured photo.
    ///
    /// `mime_type`, `size_bytes` and `compressed` describe the blob actually
    /// stored, which may differ from the capture after compression.
    pub fn from_capture(
        capture: &CapturedPhoto,
        mime_type: impl Into<String>,
        size_bytes: usize,
        compressed: bool,
    ) -> Result<Self> {
        let hash = content_hash(&capture.bytes);
        let photo_id = Uuid::now_v7().to_string();
        let size_bytes = i64::try_from(size_bytes)
            .map_err(|_| Error::InvalidInput("Photo is too large".to_string()))?;

        let item = SyncQueueItem::new(
            EntityType::Photo,
            photo_id,
            Operation::Create,
            json!({
                "parent_entity_type": capture.parent_entity_type,
                "parent_entity_id": capture.parent_entity_id,
                "photo_type": capture.photo_type,
                "captured_at": capture.captured_at,
                "content_hash": hash,
                "gps_latitude": capture.location.map(|point| point.latitude),
                "gps_longitude": capture.location.map(|point| point.longitude),
            }),
        )?;

        Ok(Self {
            item,
            blob_ref: Some(BlobRef::new()),
            parent_entity_type: capture.parent_entity_type,
            parent_entity_id: capture.parent_entity_id.clone(),
            photo_type: capture.photo_type,
            mime_type: mime_type.into(),
            size_bytes,
            content_hash: hash,
            compressed,
            is_duplicate: false,
            uploaded_at: None,
            location: capture.location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(bytes: &[u8]) -> CapturedPhoto {
        CapturedPhoto::new(
            EntityType::Ticket,
            "ticket-1",
            PhotoType::Damage,
            "image/jpeg",
            bytes.to_vec(),
        )
        .unwrap()
    }

    #[test]
    fn test_content_hash_is_stable_sha256() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_captured_photo_validation() {
        assert!(CapturedPhoto::new(EntityType::Photo, "p", PhotoType::Damage, "image/png", vec![1])
            .is_err());
        assert!(
            CapturedPhoto::new(EntityType::Ticket, " ", PhotoType::Damage, "image/png", vec![1])
                .is_err()
        );
        assert!(
            CapturedPhoto::new(EntityType::Ticket, "t", PhotoType::Damage, "", vec![1]).is_err()
        );
        assert!(
            CapturedPhoto::new(EntityType::Ticket, "t", PhotoType::Damage, "image/png", vec![])
                .is_err()
        );
    }

    #[test]
    fn test_photo_type_falls_back_to_context() {
        assert_eq!("damage".parse::<PhotoType>().unwrap(), PhotoType::Damage);
        assert_eq!("selfie".parse::<PhotoType>().unwrap(), PhotoType::Context);
    }

    #[test]
    fn test_from_capture_hashes_captured_bytes() {
        let photo = capture(b"image-data");
        let item = PhotoUploadQueueItem::from_capture(&photo, "image/jpeg", 4, true).unwrap();

        assert_eq!(item.item.entity_type, EntityType::Photo);
        assert_eq!(item.item.operation, Operation::Create);
        assert_eq!(item.content_hash, content_hash(b"image-data"));
        assert_eq!(item.item.payload["content_hash"], item.content_hash);
        assert_eq!(item.item.payload["parent_entity_id"], "ticket-1");
        assert_eq!(item.size_bytes, 4);
        assert!(item.compressed);
        assert!(item.blob_ref.is_some());
        assert!(!item.is_duplicate);
    }

    #[test]
    fn test_geo_point_rejects_out_of_range_coordinates() {
        assert!(GeoPoint::new(27.95, -82.45).is_ok());
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -180.5).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_from_capture_carries_location_into_payload() {
        let photo = capture(b"image-data").with_location(GeoPoint::new(27.95, -82.45).unwrap());
        let item = PhotoUploadQueueItem::from_capture(&photo, "image/jpeg", 10, false).unwrap();

        assert_eq!(item.location, photo.location);
        assert_eq!(item.item.payload["gps_latitude"], 27.95);
        assert_eq!(item.item.payload["gps_longitude"], -82.45);

        let plain = PhotoUploadQueueItem::from_capture(&capture(b"x"), "image/jpeg", 1, false).unwrap();
        assert!(plain.item.payload["gps_latitude"].is_null());
        assert_eq!(plain.location, None);
    }
}
