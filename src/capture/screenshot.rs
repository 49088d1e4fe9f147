//! Viewport snapshot using the `xcap` crate.
//!
//! This is the infrastructure layer: it talks to the OS.
//! Everything above it only sees `ViewportSnapshot` and PNG bytes.

use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use xcap::Monitor;

use super::{CaptureError, ViewportSnapshot};

/// Grabs the primary monitor, or the first one when none says it is primary.
pub fn capture_primary_monitor() -> Result<DynamicImage, CaptureError> {
    let mut monitors =
        Monitor::all().map_err(|e| CaptureError::CaptureFailed(format!("monitor enumeration: {}", e)))?;

    let index = monitors
        .iter()
        .position(|m| m.is_primary().unwrap_or(false))
        .unwrap_or(0);
    if index >= monitors.len() {
        return Err(CaptureError::CaptureFailed("no monitor found".to_string()));
    }
    let monitor = monitors.swap_remove(index);

    let frame = monitor
        .capture_image()
        .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;
    Ok(DynamicImage::ImageRgba8(frame))
}

/// Primary-monitor snapshot source.
#[derive(Debug, Default, Clone, Copy)]
pub struct XcapViewport;

impl ViewportSnapshot for XcapViewport {
    fn capture(&self) -> Result<Vec<u8>, CaptureError> {
        let start = std::time::Instant::now();
        let screenshot = capture_primary_monitor()?;
        let capture_ms = start.elapsed().as_millis();

        let mut png_bytes: Vec<u8> = Vec::new();
        screenshot
            .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
            .map_err(|e| CaptureError::EncodingFailed(e.to_string()))?;

        log::info!(
            "[CAPTURE] Screen captured {}x{} in {}ms, PNG encoded in {}ms ({} bytes)",
            screenshot.width(),
            screenshot.height(),
            capture_ms,
            start.elapsed().as_millis() - capture_ms,
            png_bytes.len()
        );
        Ok(png_bytes)
    }
}
