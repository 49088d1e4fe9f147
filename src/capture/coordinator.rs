//! Capture coordinator: the long-lived context that owns the snapshot.
//!
//! Flow for an area capture:
//! 1. `initiate_area_capture` resolves the page, checks policy, injects the selector
//! 2. the selector sends `captureAreaCoords` back through the inbox
//! 3. `complete_area_capture` snapshots, crops, and publishes through `Delivery`
//!
//! Nobody is guaranteed to be waiting at step 3, so every failure after the
//! caller's initial request is published, never just returned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::geometry::{compute_crop_bounds, crop_to_png_bytes};
use super::{policy, ActivePage, CaptureError, ScriptInjector, ScriptRef, ViewportSnapshot};
use crate::handoff::Delivery;
use crate::messaging::{AreaCoords, Envelope, Message, Reply};

pub struct CaptureCoordinator {
    snapshot: Arc<dyn ViewportSnapshot>,
    pages: Arc<dyn ActivePage>,
    injector: Arc<dyn ScriptInjector>,
    delivery: Delivery,
    // The snapshot primitive supports one call in flight; later callers queue here.
    snapshot_lock: Mutex<()>,
    area_pending: AtomicBool,
}

impl CaptureCoordinator {
    pub fn new(
        snapshot: Arc<dyn ViewportSnapshot>,
        pages: Arc<dyn ActivePage>,
        injector: Arc<dyn ScriptInjector>,
        delivery: Delivery,
    ) -> Self {
        Self {
            snapshot,
            pages,
            injector,
            delivery,
            snapshot_lock: Mutex::new(()),
            area_pending: AtomicBool::new(false),
        }
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub fn is_area_capture_pending(&self) -> bool {
        self.area_pending.load(Ordering::SeqCst)
    }

    /// Snapshot of the visible viewport as PNG bytes.
    pub async fn capture_full_viewport(&self) -> Result<Vec<u8>, CaptureError> {
        let _guard = self.snapshot_lock.lock().await;
        let start = std::time::Instant::now();

        let snapshot = self.snapshot.clone();
        let png = tokio::task::spawn_blocking(move || snapshot.capture())
            .await
            .map_err(|e| CaptureError::CaptureFailed(format!("Snapshot task failed: {}", e)))??;

        log::info!(
            "[CAPTURE] Viewport snapshot in {}ms ({} bytes)",
            start.elapsed().as_millis(),
            png.len()
        );
        Ok(png)
    }

    /// Starts the region selector on the active page.
    ///
    /// A second request while one is waiting for a selection is refused with
    /// `Busy` and leaves the store alone. Other failures are also published.
    pub async fn initiate_area_capture(&self) -> Result<(), CaptureError> {
        if self.area_pending.swap(true, Ordering::SeqCst) {
            log::warn!("[CAPTURE] Area capture requested while another is pending");
            return Err(CaptureError::Busy);
        }

        match self.inject_selector() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.area_pending.store(false, Ordering::SeqCst);
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn inject_selector(&self) -> Result<(), CaptureError> {
        let page = self.pages.active_page()?;
        if policy::is_restricted_url(&page.url) {
            return Err(CaptureError::RestrictedPage(page.url));
        }
        self.injector.inject(&page, ScriptRef::RegionSelector)?;
        log::info!("[CAPTURE] Region selector injected into page {}", page.id);
        Ok(())
    }

    /// Snapshot, crop to `coords`, publish. Never returns an error: there may
    /// be no one left to receive it.
    pub async fn complete_area_capture(&self, coords: AreaCoords) {
        let start = std::time::Instant::now();
        let outcome = self.crop_area(coords).await;
        self.area_pending.store(false, Ordering::SeqCst);

        match outcome {
            Ok(png) => {
                log::info!(
                    "[CAPTURE] Area {}x{} at {},{} (dpr {}) ready in {}ms, {} bytes",
                    coords.width,
                    coords.height,
                    coords.x,
                    coords.y,
                    coords.device_pixel_ratio,
                    start.elapsed().as_millis(),
                    png.len()
                );
                if let Err(e) = self.delivery.publish_image(&png) {
                    log::error!("[CAPTURE] Could not store area capture: {}", e);
                }
            }
            Err(e) => self.fail(&e),
        }
    }

    async fn crop_area(&self, coords: AreaCoords) -> Result<Vec<u8>, CaptureError> {
        let snapshot = self.capture_full_viewport().await?;
        tokio::task::spawn_blocking(move || crop_snapshot(&snapshot, coords))
            .await
            .map_err(|e| CaptureError::EncodingFailed(format!("Crop task failed: {}", e)))?
    }

    /// The selector went away without a selection.
    pub fn cancel_area_capture(&self) {
        if self.area_pending.swap(false, Ordering::SeqCst) {
            log::info!("[CAPTURE] Area selection cancelled");
        }
    }

    fn fail(&self, error: &CaptureError) {
        log::error!("[CAPTURE] {} ({})", error, error.kind());
        if let Err(store_err) = self.delivery.publish_error(error) {
            log::error!("[CAPTURE] Could not store failure '{}': {}", error, store_err);
        }
    }

    pub async fn handle(&self, envelope: Envelope) {
        let Envelope { message, reply } = envelope;
        log::debug!("[CAPTURE] Handling '{}'", message.action());

        let answer = match message {
            Message::Capture => Some(match self.capture_full_viewport().await {
                Ok(png) => Reply::Image(png),
                Err(e) => {
                    log::error!("[CAPTURE] Full capture failed: {}", e);
                    Reply::Failed(e)
                }
            }),
            Message::InitiateAreaCapture => Some(match self.initiate_area_capture().await {
                Ok(()) => Reply::Accepted,
                Err(e) => Reply::Failed(e),
            }),
            Message::CaptureAreaCoords { coords } => {
                self.complete_area_capture(coords).await;
                Some(Reply::Accepted)
            }
            Message::AreaSelectionCancelled { .. } => {
                self.cancel_area_capture();
                Some(Reply::Accepted)
            }
            other => {
                log::warn!("[CAPTURE] Ignoring UI-bound message '{}'", other.action());
                None
            }
        };

        if let (Some(reply), Some(answer)) = (reply, answer) {
            // The requester may have closed; that is fine.
            let _ = reply.send(answer);
        }
    }

    /// Runs the coordinator's event loop until every handle is dropped.
    pub async fn serve(self: Arc<Self>, mut inbox: mpsc::Receiver<Envelope>) {
        log::info!("[CAPTURE] Coordinator running");
        while let Some(envelope) = inbox.recv().await {
            self.handle(envelope).await;
        }
        log::info!("[CAPTURE] Coordinator stopped");
    }
}

/// Decodes a snapshot and crops it to the selector's rectangle.
fn crop_snapshot(snapshot_png: &[u8], coords: AreaCoords) -> Result<Vec<u8>, CaptureError> {
    let image = image::load_from_memory(snapshot_png)
        .map_err(|e| CaptureError::EncodingFailed(format!("snapshot decode: {}", e)))?;
    let bounds = compute_crop_bounds(
        &coords.selection(),
        coords.device_pixel_ratio,
        image.width(),
        image.height(),
    )?;
    Ok(crop_to_png_bytes(&image, bounds)?)
}
