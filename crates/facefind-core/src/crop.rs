//! Padded face crops.

use crate::types::BoundingBox;
use image::DynamicImage;
use thiserror::Error;

/// Fraction of the box size added on each side of an exported face crop.
pub const DEFAULT_CROP_PADDING: f32 = 0.2;

#[derive(Error, Debug)]
pub enum CropError {
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("padding must be finite and non-negative, got {0}")]
    InvalidPadding(f32),
    #[error("face box lies outside the {width}x{height} image")]
    EmptyRegion { width: u32, height: u32 },
}

/// Pixel region within the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Compute the padded crop region for `bbox`, clipped to the image.
///
/// Each edge moves outwards by `padding` times the box's own width (left and
/// right) or height (top and bottom). Left/top are floored and right/bottom
/// ceiled so the region always covers the box. Returns `None` when nothing of
/// the padded box falls inside the image.
pub fn crop_region(
    image_width: u32,
    image_height: u32,
    bbox: &BoundingBox,
    padding: f32,
) -> Option<CropRegion> {
    let pad_x = bbox.width * padding;
    let pad_y = bbox.height * padding;

    let left = (bbox.x - pad_x).floor().max(0.0);
    let top = (bbox.y - pad_y).floor().max(0.0);
    let right = (bbox.right() + pad_x).ceil().min(image_width as f32);
    let bottom = (bbox.bottom() + pad_y).ceil().min(image_height as f32);

    if right <= left || bottom <= top {
        return None;
    }

    Some(CropRegion {
        x: left as u32,
        y: top as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}

/// Crop the face in `bbox` out of `image`, expanded by `padding`.
pub fn crop_face(
    image: &DynamicImage,
    bbox: &BoundingBox,
    padding: f32,
) -> Result<DynamicImage, CropError> {
    if !padding.is_finite() || padding < 0.0 {
        return Err(CropError::InvalidPadding(padding));
    }

    let (width, height) = (image.width(), image.height());
    let region = crop_region(width, height, bbox, padding)
        .ok_or(CropError::EmptyRegion { width, height })?;

    tracing::trace!(?region, "cropping face");
    Ok(image.crop_imm(region.x, region.y, region.width, region.height))
}

/// Decode an encoded image (JPEG, PNG, ...) and crop the face out of it.
pub fn crop_face_from_bytes(
    encoded: &[u8],
    bbox: &BoundingBox,
    padding: f32,
) -> Result<DynamicImage, CropError> {
    let image = image::load_from_memory(encoded)?;
    crop_face(&image, bbox, padding)
}
