//! Thumbnail generation for uploaded images.
//!
//! When previews are enabled, uploads of common image formats get a 128x128
//! JPEG thumbnail. It is encrypted with the file key and stored as file
//! attribute `0`; other files upload without one.

use std::io::Cursor;
use std::path::Path;

use image::{ImageFormat, ImageReader};

use crate::crypto::aes128_cbc_encrypt;
use crate::error::{MegaError, Result};

/// Thumbnail edge length in pixels.
pub const THUMBNAIL_SIZE: u32 = 128;

/// Larger images upload without a thumbnail; decoding reads them whole.
pub const MAX_PREVIEW_SOURCE: u64 = 32 * 1024 * 1024;

/// File attribute type of a thumbnail.
pub(crate) const THUMBNAIL_ATTR: &str = "0";

/// Extensions decoded with the enabled `image` codecs.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Check if a file extension is a supported image format (case-insensitive).
///
/// # Example
/// ```
/// use megacore::preview::is_image;
///
/// assert!(is_image("jpg"));
/// assert!(is_image("PNG"));
/// assert!(!is_image("txt"));
/// ```
pub fn is_image(extension: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&extension.to_lowercase().as_str())
}

/// `true` if `name` looks like an image we can thumbnail.
pub fn is_image_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(is_image)
}

/// Decode `data`, crop-resize it to 128x128 and encode it as JPEG.
pub fn generate_image_thumbnail(data: &[u8]) -> Result<Vec<u8>> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| MegaError::InvalidArgument(format!("cannot detect image format: {}", e)))?
        .decode()
        .map_err(|e| MegaError::InvalidArgument(format!("cannot decode image: {}", e)))?;

    let thumbnail = img
        .resize_to_fill(
            THUMBNAIL_SIZE,
            THUMBNAIL_SIZE,
            image::imageops::FilterType::Lanczos3,
        )
        .to_rgb8();

    let mut output = Vec::new();
    thumbnail
        .write_to(&mut Cursor::new(&mut output), ImageFormat::Jpeg)
        .map_err(|e| MegaError::InvalidArgument(format!("cannot encode thumbnail: {}", e)))?;
    Ok(output)
}

/// Thumbnail for an upload named `name`, or `None` for non-images.
///
/// Decoding runs on the blocking pool.
pub(crate) async fn thumbnail_for(name: &str, data: Vec<u8>) -> Option<Result<Vec<u8>>> {
    if !is_image_name(name) {
        return None;
    }
    let result = tokio::task::spawn_blocking(move || generate_image_thumbnail(&data))
        .await
        .unwrap_or_else(|e| Err(MegaError::InvalidArgument(format!("thumbnail task failed: {}", e))));
    Some(result)
}

/// Zero-pad to the block size and encrypt with AES-CBC under the file key.
pub(crate) fn encrypt_file_attribute(data: &[u8], file_key: &[u8; 16]) -> Result<Vec<u8>> {
    let mut padded = data.to_vec();
    padded.resize(data.len().div_ceil(16) * 16, 0);
    aes128_cbc_encrypt(&padded, file_key)
}
