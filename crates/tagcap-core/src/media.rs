//! Image payload preparation for captioning requests.
//!
//! Oversized images are downscaled before upload; everything else is sent
//! byte-for-byte as read from disk.

use crate::error::CaptionError;
use base64::Engine;
use image::imageops::FilterType;
use std::io::Cursor;
use std::path::Path;

/// Base64-encoded image ready to embed in a request part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    /// Base64-encoded image bytes
    pub data: String,
    /// MIME type (e.g., "image/jpeg", "image/png")
    pub media_type: String,
}

impl ImageInput {
    /// Create an `ImageInput` from raw bytes and format string.
    ///
    /// The format is the image format identifier (e.g., "jpeg", "png", "webp").
    pub fn from_bytes(bytes: &[u8], format: &str) -> Self {
        let media_type = match format {
            "jpeg" | "jpg" => "image/jpeg",
            "png" => "image/png",
            "webp" => "image/webp",
            "gif" => "image/gif",
            other => {
                tracing::warn!("Unknown image format '{other}', defaulting to image/jpeg");
                "image/jpeg"
            }
        };

        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            media_type: media_type.to_string(),
        }
    }
}

/// Load an image file and prepare it for upload.
///
/// When both dimensions exceed `max_edge` the image is downscaled so its
/// longer side equals `max_edge` and re-encoded as JPEG; smaller images are
/// passed through unmodified with a MIME type derived from the extension.
pub fn prepare_image(path: &Path, max_edge: u32) -> Result<ImageInput, CaptionError> {
    let bytes = std::fs::read(path).map_err(|e| CaptionError::io(path, e))?;
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_else(|| "jpeg".to_string());

    let decoded = image::load_from_memory(&bytes).map_err(|e| CaptionError::Image {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if decoded.width() > max_edge && decoded.height() > max_edge {
        let resized = decoded.resize(max_edge, max_edge, FilterType::Triangle);
        let rgb = resized.into_rgb8();
        let mut encoded = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut encoded), image::ImageFormat::Jpeg)
            .map_err(|e| CaptionError::Image {
                path: path.to_path_buf(),
                message: format!("JPEG re-encode failed: {e}"),
            })?;
        tracing::debug!(
            "Downscaled {:?} from {}x{} for upload",
            path,
            decoded.width(),
            decoded.height()
        );
        Ok(ImageInput::from_bytes(&encoded, "jpeg"))
    } else {
        Ok(ImageInput::from_bytes(&bytes, &format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn write_test_png(path: &Path, width: u32, height: u32) {
        let buffer = ImageBuffer::from_pixel(width, height, Rgb::<u8>([120, 80, 40]));
        buffer.save(path).unwrap();
    }

    #[test]
    fn test_image_input_from_bytes_jpeg() {
        let input = ImageInput::from_bytes(&[0xFF, 0xD8, 0xFF], "jpeg");
        assert_eq!(input.media_type, "image/jpeg");
        assert!(!input.data.is_empty());
    }

    #[test]
    fn test_image_input_from_bytes_png() {
        let input = ImageInput::from_bytes(&[0x89, 0x50, 0x4E, 0x47], "png");
        assert_eq!(input.media_type, "image/png");
    }

    #[test]
    fn test_image_input_unknown_format_defaults_to_jpeg() {
        let input = ImageInput::from_bytes(&[1, 2, 3], "tiff");
        assert_eq!(input.media_type, "image/jpeg");
    }

    #[test]
    fn test_prepare_small_image_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.png");
        write_test_png(&path, 64, 64);

        let input = prepare_image(&path, 768).unwrap();
        assert_eq!(input.media_type, "image/png");

        let original = std::fs::read(&path).unwrap();
        let expected = base64::engine::general_purpose::STANDARD.encode(&original);
        assert_eq!(input.data, expected);
    }

    #[test]
    fn test_prepare_large_image_downscales_to_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.png");
        write_test_png(&path, 1600, 1200);

        let input = prepare_image(&path, 768).unwrap();
        assert_eq!(input.media_type, "image/jpeg");

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&input.data)
            .unwrap();
        let reloaded = image::load_from_memory(&decoded).unwrap();
        assert_eq!(reloaded.width().max(reloaded.height()), 768);
    }

    #[test]
    fn test_prepare_image_one_small_edge_not_resized() {
        // Only images with BOTH dimensions over the limit are downscaled.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        write_test_png(&path, 1600, 400);

        let input = prepare_image(&path, 768).unwrap();
        assert_eq!(input.media_type, "image/png");
    }

    #[test]
    fn test_prepare_missing_file_is_io_error() {
        let result = prepare_image(Path::new("/nonexistent/ghost.png"), 768);
        assert!(matches!(result, Err(CaptionError::Io { .. })));
    }

    #[test]
    fn test_prepare_non_image_is_image_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_an_image.png");
        std::fs::write(&path, b"plain text").unwrap();

        let result = prepare_image(&path, 768);
        assert!(matches!(result, Err(CaptionError::Image { .. })));
    }
}
