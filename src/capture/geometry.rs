//! Pure crop geometry: functional core.
//!
//! This module has zero infrastructure dependencies.
//! Selections come in as CSS pixels, bounds go out as raster pixels.

use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::ErrorKind;

/// A normalized screen-space selection: width and height are never negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SelectionRect {
    /// Rectangle spanning two corner points, whichever way the drag went.
    pub fn from_corners(start: (f64, f64), end: (f64, f64)) -> Self {
        Self {
            x: start.0.min(end.0),
            y: start.1.min(end.1),
            width: (end.0 - start.0).abs(),
            height: (end.1 - start.1).abs(),
        }
    }
}

/// Crop bounds in source-raster pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn as_tuple(&self) -> (u32, u32, u32, u32) {
        (self.x, self.y, self.width, self.height)
    }
}

/// Maps a UI-space selection onto the captured raster.
///
/// Every coordinate and dimension is multiplied by `scale` (the device pixel
/// ratio) and rounded to the nearest pixel. The result must lie entirely
/// inside `source_width` x `source_height`; nothing is clamped.
pub fn compute_crop_bounds(
    selection: &SelectionRect,
    scale: f64,
    source_width: u32,
    source_height: u32,
) -> Result<PixelRect, GeometryError> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(GeometryError::InvalidScale(scale));
    }

    let scaled = [
        selection.x * scale,
        selection.y * scale,
        selection.width * scale,
        selection.height * scale,
    ];
    if scaled.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(GeometryError::OutOfBounds {
            requested: (selection.x, selection.y, selection.width, selection.height),
            image_size: (source_width, source_height),
        });
    }

    let [x, y, width, height] = scaled;
    if x + width > source_width as f64 || y + height > source_height as f64 {
        return Err(GeometryError::OutOfBounds {
            requested: (x, y, width, height),
            image_size: (source_width, source_height),
        });
    }

    // Round edges, not sizes, so a fitting region never grows past the raster.
    let (left, top) = (x.round(), y.round());
    let (right, bottom) = ((x + width).round(), (y + height).round());
    let bounds = PixelRect::new(
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    );
    validate_bounds(bounds, source_width, source_height)?;
    Ok(bounds)
}

/// Checks that `bounds` is non-empty and lies inside an image of the given size.
pub fn validate_bounds(bounds: PixelRect, image_width: u32, image_height: u32) -> Result<(), GeometryError> {
    if bounds.width == 0 || bounds.height == 0 {
        return Err(GeometryError::ZeroDimension);
    }

    let right = bounds.x as u64 + bounds.width as u64;
    let bottom = bounds.y as u64 + bounds.height as u64;
    if right > image_width as u64 || bottom > image_height as u64 {
        return Err(GeometryError::OutOfBounds {
            requested: (
                bounds.x as f64,
                bounds.y as f64,
                bounds.width as f64,
                bounds.height as f64,
            ),
            image_size: (image_width, image_height),
        });
    }
    Ok(())
}

/// Crops a `DynamicImage` to `bounds` and returns PNG bytes.
pub fn crop_to_png_bytes(image: &DynamicImage, bounds: PixelRect) -> Result<Vec<u8>, GeometryError> {
    validate_bounds(bounds, image.width(), image.height())?;

    let (x, y, width, height) = bounds.as_tuple();
    let cropped = image.crop_imm(x, y, width, height);

    let mut png_bytes: Vec<u8> = Vec::new();
    cropped
        .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .map_err(|e| GeometryError::EncodingFailed(e.to_string()))?;

    Ok(png_bytes)
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GeometryError {
    #[error("Crop rectangle has zero width or height")]
    ZeroDimension,

    #[error("Scale factor {0} is not a positive finite number")]
    InvalidScale(f64),

    #[error(
        "Crop rectangle ({},{},{},{}) exceeds image bounds ({}x{})",
        requested.0, requested.1, requested.2, requested.3,
        image_size.0, image_size.1
    )]
    OutOfBounds {
        requested: (f64, f64, f64, f64),
        image_size: (u32, u32),
    },

    #[error("PNG encoding failed: {0}")]
    EncodingFailed(String),
}

impl GeometryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GeometryError::EncodingFailed(_) => ErrorKind::EncodingFailed,
            _ => ErrorKind::OutOfBounds,
        }
    }
}
