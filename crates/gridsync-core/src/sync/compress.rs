//! Photo compression before enqueue.

use std::io::Cursor;

use image::{codecs::jpeg::JpegEncoder, DynamicImage, GenericImageView};

use crate::config::PhotoCompression;
use crate::{Error, Result};

/// Bytes that will actually be stored and uploaded for a captured photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPhoto {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub compressed: bool,
}

/// Shrink a photo that exceeds `options.max_bytes`.
///
/// Oversized images are bounded to `max_dimension` on the longest edge and
/// re-encoded as JPEG. Photos within the bound, photos that fail to decode and
/// photos that would not get smaller are returned untouched; the remote
/// endpoint is the authority on whether an image is valid.
pub fn prepare_photo(bytes: &[u8], mime_type: &str, options: PhotoCompression) -> PreparedPhoto {
    let untouched = || PreparedPhoto {
        bytes: bytes.to_vec(),
        mime_type: mime_type.to_string(),
        compressed: false,
    };

    if bytes.len() <= options.max_bytes {
        return untouched();
    }

    match reencode(bytes, options) {
        Ok(encoded) if encoded.len() < bytes.len() => {
            tracing::debug!(
                "Compressed photo from {} to {} bytes",
                bytes.len(),
                encoded.len()
            );
            PreparedPhoto {
                bytes: encoded,
                mime_type: "image/jpeg".to_string(),
                compressed: true,
            }
        }
        Ok(_) => untouched(),
        Err(error) => {
            tracing::warn!("Queueing photo uncompressed: {error}");
            untouched()
        }
    }
}

fn reencode(bytes: &[u8], options: PhotoCompression) -> Result<Vec<u8>> {
    if options.max_dimension == 0 {
        return Err(Error::InvalidInput(
            "Photo max dimension must be greater than zero".to_string(),
        ));
    }

    let source = image::load_from_memory(bytes)
        .map_err(|error| Error::InvalidInput(format!("Failed to decode photo: {error}")))?;

    let (width, height) = source.dimensions();
    let bounded = if width <= options.max_dimension && height <= options.max_dimension {
        source
    } else {
        source.thumbnail(options.max_dimension, options.max_dimension)
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(bounded.to_rgb8());

    let mut cursor = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut cursor, options.jpeg_quality);
    encoder
        .encode_image(&rgb)
        .map_err(|error| Error::InvalidInput(format!("Failed to encode JPEG photo: {error}")))?;

    Ok(cursor.into_inner())
}
