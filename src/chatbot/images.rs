//! Shrinks images before they are sent to the model.

use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::chatbot::message::Media;

/// Images are scaled down to fit a square of this side.
pub const MAX_IMAGE_SIDE: u32 = 512;
const JPEG_QUALITY: u8 = 85;

/// Decode an image, shrink it to fit `MAX_IMAGE_SIDE` while keeping its
/// aspect ratio, and re-encode it as JPEG. Small images are never enlarged.
///
/// CPU bound: call it from a blocking task.
pub fn prepare_image(bytes: &[u8]) -> Result<Media, String> {
    let decoded = image::load_from_memory(bytes).map_err(|e| format!("Failed to decode image: {e}"))?;

    let fitted = if decoded.width() > MAX_IMAGE_SIDE || decoded.height() > MAX_IMAGE_SIDE {
        decoded.resize(MAX_IMAGE_SIDE, MAX_IMAGE_SIDE, FilterType::Triangle)
    } else {
        decoded
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(fitted.to_rgb8());
    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))
        .map_err(|e| format!("Failed to encode image: {e}"))?;

    Ok(Media {
        bytes: out,
        content_type: "image/jpeg".to_string(),
    })
}
