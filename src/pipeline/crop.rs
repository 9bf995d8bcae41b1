//! Formula cropping: cut a region out of a rendered page and pad it.
//!
//! Vision models read whatever touches the image border. A tight crop
//! followed by a white margin keeps neighbouring body text out of the
//! transcription.

use crate::layout::BBox;
use image::{imageops, DynamicImage, Rgb, RgbImage};

/// Crop `bbox` (page points) out of `page` (rendered at `dpi`) and pad it.
///
/// Coordinates are scaled by `dpi / 72`, truncated to whole pixels and
/// clamped to the bitmap, so boxes partly or wholly outside the page never
/// fail; a fully clipped box yields a blank `2 * padding` square.
pub fn crop_formula_image(page: &DynamicImage, bbox: &BBox, dpi: u32, padding: u32) -> RgbImage {
    let scale = dpi as f32 / 72.0;
    let (width, height) = (page.width(), page.height());

    let to_px = |v: f32, limit: u32| -> u32 { ((v * scale) as i64).clamp(0, limit as i64) as u32 };
    let x0 = to_px(bbox.x0, width);
    let y0 = to_px(bbox.y0, height);
    let x1 = to_px(bbox.x1, width).max(x0);
    let y1 = to_px(bbox.y1, height).max(y0);

    let cropped = page.crop_imm(x0, y0, x1 - x0, y1 - y0).to_rgb8();

    let mut canvas = RgbImage::from_pixel(
        cropped.width() + 2 * padding,
        cropped.height() + 2 * padding,
        Rgb([255, 255, 255]),
    );
    imageops::overlay(&mut canvas, &cropped, padding as i64, padding as i64);
    canvas
}
