//! Screen capture domain: public API.
//!
//! This module owns the viewport snapshot, crop geometry, the page policy,
//! and the coordinator that strings them together. The snapshot and page
//! access are capabilities (traits) so the coordinator never talks to the
//! OS directly.

pub mod coordinator;
pub mod geometry;
pub mod policy;
mod screenshot;

pub use coordinator::CaptureCoordinator;
pub use geometry::{compute_crop_bounds, crop_to_png_bytes, GeometryError, PixelRect, SelectionRect};
pub use screenshot::{capture_primary_monitor, XcapViewport};

use crate::error::ErrorKind;

/// Raster snapshot of the visible viewport, PNG encoded.
///
/// One snapshot at a time; the coordinator serializes callers.
pub trait ViewportSnapshot: Send + Sync {
    fn capture(&self) -> Result<Vec<u8>, CaptureError>;
}

/// The page the user is looking at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHandle {
    pub id: u64,
    pub url: String,
}

/// Scripts the coordinator knows how to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptRef {
    RegionSelector,
}

/// Resolves the active page.
pub trait ActivePage: Send + Sync {
    fn active_page(&self) -> Result<PageHandle, CaptureError>;
}

/// Runs a script inside a page context.
///
/// Fails with `RestrictedPage` or `InjectionFailed`.
pub trait ScriptInjector: Send + Sync {
    fn inject(&self, page: &PageHandle, script: ScriptRef) -> Result<(), CaptureError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("Cannot capture an area on a restricted page: {0}")]
    RestrictedPage(String),

    #[error("Failed to start area selection: {0}")]
    InjectionFailed(String),

    #[error("Screen capture failed: {0}")]
    CaptureFailed(String),

    #[error("Selected area is outside the captured image: {0}")]
    OutOfBounds(String),

    #[error("Image encoding failed: {0}")]
    EncodingFailed(String),

    #[error("An area capture is already in progress")]
    Busy,
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::RestrictedPage(_) => ErrorKind::RestrictedPage,
            CaptureError::InjectionFailed(_) => ErrorKind::InjectionFailed,
            CaptureError::CaptureFailed(_) => ErrorKind::CaptureFailed,
            CaptureError::OutOfBounds(_) => ErrorKind::OutOfBounds,
            CaptureError::EncodingFailed(_) => ErrorKind::EncodingFailed,
            CaptureError::Busy => ErrorKind::Busy,
        }
    }
}

impl From<GeometryError> for CaptureError {
    fn from(e: GeometryError) -> Self {
        match e.kind() {
            ErrorKind::EncodingFailed => CaptureError::EncodingFailed(e.to_string()),
            _ => CaptureError::OutOfBounds(e.to_string()),
        }
    }
}
