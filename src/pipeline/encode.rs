//! Image encoding: formula crop → base64 PNG wrapped in `ImageData`.
//!
//! PNG keeps the thin strokes of sub- and superscripts intact; JPEG ringing
//! around glyph edges measurably hurts LaTeX recognition.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{DynamicImage, RgbImage};
use std::io::Cursor;
use tracing::debug;

/// Encode a padded formula crop as a base64 PNG ready for the OCR request.
pub fn encode_crop(img: RgbImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded formula crop → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// `data:` URL form of an encoded image, as chat-completion APIs expect it.
pub fn data_url(image: &ImageData) -> String {
    format!("data:{};base64,{}", image.mime_type, image.data)
}
