//! Region selector: the in-page overlay that turns a drag into a selection.
//!
//! `RegionSelector` is one activation: it mounts its overlay when created and
//! unmounts it on every way out (selection, too-small release, Escape, or
//! simply being dropped). `PageHost` is the page side of the injection
//! capability: it owns at most one selector per page and forwards the
//! outcome to the coordinator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::capture::geometry::SelectionRect;
use crate::capture::{ActivePage, CaptureError, PageHandle, ScriptInjector, ScriptRef};
use crate::messaging::{AreaCoords, CoordinatorHandle, Message};

/// Releases smaller than this in either dimension are treated as a cancel.
pub const MIN_SELECTION_PX: f64 = 10.0;

/// Visual artifacts of the selector.
pub trait OverlayView {
    /// Full-viewport dimming layer with a crosshair.
    fn mount(&mut self);
    fn show_indicator(&mut self, rect: SelectionRect);
    /// Removes the overlay and the indicator.
    fn unmount(&mut self);
}

impl<V: OverlayView + ?Sized> OverlayView for Box<V> {
    fn mount(&mut self) {
        (**self).mount()
    }

    fn show_indicator(&mut self, rect: SelectionRect) {
        (**self).show_indicator(rect)
    }

    fn unmount(&mut self) {
        (**self).unmount()
    }
}

/// What is currently on screen.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OverlayState {
    pub mounted: bool,
    pub indicator: Option<SelectionRect>,
}

/// Overlay whose state can be inspected from outside (headless pages, tests).
#[derive(Debug, Clone, Default)]
pub struct SharedOverlay {
    state: Arc<Mutex<OverlayState>>,
}

impl SharedOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> OverlayState {
        self.state.lock().map(|s| *s).unwrap_or_default()
    }

    fn update(&self, f: impl FnOnce(&mut OverlayState)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }
}

impl OverlayView for SharedOverlay {
    fn mount(&mut self) {
        self.update(|s| {
            s.mounted = true;
            s.indicator = None;
        });
    }

    fn show_indicator(&mut self, rect: SelectionRect) {
        self.update(|s| s.indicator = Some(rect));
    }

    fn unmount(&mut self) {
        self.update(|s| *s = OverlayState::default());
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectorState {
    Idle,
    Selecting { anchor: (f64, f64), current: (f64, f64) },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectorOutcome {
    /// Still running.
    Pending,
    Selected(AreaCoords),
    Cancelled,
}

pub struct RegionSelector<V: OverlayView> {
    view: V,
    state: SelectorState,
    device_pixel_ratio: f64,
}

impl<V: OverlayView> RegionSelector<V> {
    pub fn activate(mut view: V, device_pixel_ratio: f64) -> Self {
        view.mount();
        Self {
            view,
            state: SelectorState::Idle,
            device_pixel_ratio,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SelectorState::Closed
    }

    pub fn pointer_down(&mut self, x: f64, y: f64) -> SelectorOutcome {
        if self.is_closed() {
            return SelectorOutcome::Cancelled;
        }
        self.state = SelectorState::Selecting {
            anchor: (x, y),
            current: (x, y),
        };
        self.view.show_indicator(SelectionRect::from_corners((x, y), (x, y)));
        SelectorOutcome::Pending
    }

    pub fn pointer_move(&mut self, x: f64, y: f64) -> SelectorOutcome {
        match &mut self.state {
            SelectorState::Selecting { anchor, current } => {
                *current = (x, y);
                let rect = SelectionRect::from_corners(*anchor, *current);
                self.view.show_indicator(rect);
                SelectorOutcome::Pending
            }
            SelectorState::Idle => SelectorOutcome::Pending,
            SelectorState::Closed => SelectorOutcome::Cancelled,
        }
    }

    pub fn pointer_up(&mut self, x: f64, y: f64) -> SelectorOutcome {
        let SelectorState::Selecting { anchor, .. } = self.state else {
            self.close();
            return SelectorOutcome::Cancelled;
        };

        let rect = SelectionRect::from_corners(anchor, (x, y));
        self.close();

        if rect.width < MIN_SELECTION_PX || rect.height < MIN_SELECTION_PX {
            log::info!(
                "[SELECTOR] Selected area too small ({}x{}), cancelling",
                rect.width,
                rect.height
            );
            return SelectorOutcome::Cancelled;
        }
        SelectorOutcome::Selected(AreaCoords::new(rect, self.device_pixel_ratio))
    }

    /// Escape cancels at any point, mid-drag included.
    pub fn key_down(&mut self, key: &str) -> SelectorOutcome {
        if key == "Escape" {
            self.close();
            return SelectorOutcome::Cancelled;
        }
        if self.is_closed() {
            SelectorOutcome::Cancelled
        } else {
            SelectorOutcome::Pending
        }
    }

    fn close(&mut self) {
        if self.state != SelectorState::Closed {
            self.view.unmount();
            self.state = SelectorState::Closed;
        }
    }
}

impl<V: OverlayView> Drop for RegionSelector<V> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Input delivered to a page while the selector runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PageEvent {
    PointerDown { x: f64, y: f64 },
    PointerMove { x: f64, y: f64 },
    PointerUp { x: f64, y: f64 },
    KeyDown { key: String },
}

type OverlayFactory = Box<dyn Fn(&PageHandle) -> Box<dyn OverlayView + Send> + Send + Sync>;

struct Page {
    url: String,
    device_pixel_ratio: f64,
    selector: Option<RegionSelector<Box<dyn OverlayView + Send>>>,
}

struct Pages {
    next_id: u64,
    active: Option<u64>,
    open: HashMap<u64, Page>,
}

/// In-process page contexts: tracks open pages, hosts injected selectors, and
/// reports their outcome to the coordinator.
pub struct PageHost {
    pages: Mutex<Pages>,
    overlays: OverlayFactory,
    coordinator: CoordinatorHandle,
}

impl PageHost {
    pub fn new(coordinator: CoordinatorHandle) -> Self {
        Self::with_overlays(coordinator, |_| Box::new(SharedOverlay::new()))
    }

    pub fn with_overlays(
        coordinator: CoordinatorHandle,
        overlays: impl Fn(&PageHandle) -> Box<dyn OverlayView + Send> + Send + Sync + 'static,
    ) -> Self {
        Self {
            pages: Mutex::new(Pages {
                next_id: 1,
                active: None,
                open: HashMap::new(),
            }),
            overlays: Box::new(overlays),
            coordinator,
        }
    }

    /// Opens a page and makes it the active one.
    pub fn open_page(&self, url: &str, device_pixel_ratio: f64) -> PageHandle {
        let mut pages = self.lock();
        let id = pages.next_id;
        pages.next_id += 1;
        pages.open.insert(
            id,
            Page {
                url: url.to_string(),
                device_pixel_ratio,
                selector: None,
            },
        );
        pages.active = Some(id);
        PageHandle {
            id,
            url: url.to_string(),
        }
    }

    pub fn activate(&self, page_id: u64) -> bool {
        let mut pages = self.lock();
        if pages.open.contains_key(&page_id) {
            pages.active = Some(page_id);
            true
        } else {
            false
        }
    }

    /// Closing a page drops (and so cleans up) its selector. A selector that
    /// was still running counts as cancelled.
    pub fn close_page(&self, page_id: u64) {
        let had_selector = {
            let mut pages = self.lock();
            let removed = pages.open.remove(&page_id);
            if removed.is_some() && pages.active == Some(page_id) {
                pages.active = None;
            }
            removed.is_some_and(|p| p.selector.is_some())
        };

        if had_selector {
            log::info!("[SELECTOR] Page {} closed mid-selection", page_id);
            self.coordinator.send(Message::AreaSelectionCancelled { page_id });
        }
    }

    /// Whether a selector is live in this page.
    pub fn has_instance(&self, page_id: u64) -> bool {
        self.lock()
            .open
            .get(&page_id)
            .is_some_and(|p| p.selector.is_some())
    }

    /// Feeds one input event to the page's selector, if it has one.
    pub fn dispatch(&self, page_id: u64, event: &PageEvent) -> Option<SelectorOutcome> {
        let outcome = {
            let mut pages = self.lock();
            let page = pages.open.get_mut(&page_id)?;
            let selector = page.selector.as_mut()?;
            let outcome = match event {
                PageEvent::PointerDown { x, y } => selector.pointer_down(*x, *y),
                PageEvent::PointerMove { x, y } => selector.pointer_move(*x, *y),
                PageEvent::PointerUp { x, y } => selector.pointer_up(*x, *y),
                PageEvent::KeyDown { key } => selector.key_down(key),
            };
            if outcome != SelectorOutcome::Pending {
                // Re-arm: a later injection may activate again.
                page.selector = None;
            }
            outcome
        };

        match outcome {
            SelectorOutcome::Selected(coords) => {
                self.coordinator.send(Message::CaptureAreaCoords { coords });
            }
            SelectorOutcome::Cancelled => {
                self.coordinator.send(Message::AreaSelectionCancelled { page_id });
            }
            SelectorOutcome::Pending => {}
        }
        Some(outcome)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Pages> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.pages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ActivePage for PageHost {
    fn active_page(&self) -> Result<PageHandle, CaptureError> {
        let pages = self.lock();
        pages
            .active
            .and_then(|id| {
                pages.open.get(&id).map(|p| PageHandle {
                    id,
                    url: p.url.clone(),
                })
            })
            .ok_or_else(|| CaptureError::InjectionFailed("no active page".to_string()))
    }
}

impl ScriptInjector for PageHost {
    fn inject(&self, page: &PageHandle, script: ScriptRef) -> Result<(), CaptureError> {
        let mut pages = self.lock();
        let entry = pages
            .open
            .get_mut(&page.id)
            .ok_or_else(|| CaptureError::InjectionFailed(format!("page {} is gone", page.id)))?;

        match script {
            ScriptRef::RegionSelector => {
                if entry.selector.is_some() {
                    log::info!("[SELECTOR] Already active in page {}, ignoring", page.id);
                    return Ok(());
                }
                let view = (self.overlays)(page);
                entry.selector = Some(RegionSelector::activate(view, entry.device_pixel_ratio));
                log::info!("[SELECTOR] Activated in page {}", page.id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::Envelope;
    use tokio::sync::mpsc;

    fn host() -> (PageHost, mpsc::Receiver<Envelope>, SharedOverlay) {
        let (handle, inbox) = CoordinatorHandle::channel(8);
        let overlay = SharedOverlay::new();
        let shared = overlay.clone();
        let host = PageHost::with_overlays(handle, move |_| Box::new(shared.clone()));
        (host, inbox, overlay)
    }

    #[test]
    fn drag_emits_normalized_selection() {
        let overlay = SharedOverlay::new();
        let mut selector = RegionSelector::activate(overlay.clone(), 2.0);
        assert!(overlay.state().mounted);

        selector.pointer_down(300.0, 200.0);
        selector.pointer_move(100.0, 50.0);
        assert_eq!(
            overlay.state().indicator,
            Some(SelectionRect {
                x: 100.0,
                y: 50.0,
                width: 200.0,
                height: 150.0
            })
        );

        match selector.pointer_up(100.0, 50.0) {
            SelectorOutcome::Selected(coords) => {
                assert_eq!((coords.x, coords.y, coords.width, coords.height), (100.0, 50.0, 200.0, 150.0));
                assert_eq!(coords.device_pixel_ratio, 2.0);
            }
            other => panic!("expected selection, got {:?}", other),
        }
        assert_eq!(overlay.state(), OverlayState::default());
    }

    #[test]
    fn small_selections_are_cancelled() {
        for (w, h) in [(9.0, 50.0), (50.0, 9.99), (0.0, 0.0)] {
            let overlay = SharedOverlay::new();
            let mut selector = RegionSelector::activate(overlay.clone(), 1.0);
            selector.pointer_down(20.0, 20.0);
            selector.pointer_move(20.0 + w, 20.0 + h);
            assert_eq!(selector.pointer_up(20.0 + w, 20.0 + h), SelectorOutcome::Cancelled);
            assert!(!overlay.state().mounted);
        }
    }

    #[test]
    fn escape_mid_drag_cancels_and_cleans_up() {
        let overlay = SharedOverlay::new();
        let mut selector = RegionSelector::activate(overlay.clone(), 1.0);
        selector.pointer_down(0.0, 0.0);
        selector.pointer_move(100.0, 100.0);
        assert!(overlay.state().indicator.is_some());

        assert_eq!(selector.key_down("Escape"), SelectorOutcome::Cancelled);
        assert_eq!(overlay.state(), OverlayState::default());
        // Nothing after close produces a selection.
        assert_eq!(selector.pointer_up(100.0, 100.0), SelectorOutcome::Cancelled);
    }

    #[test]
    fn other_keys_are_ignored() {
        let overlay = SharedOverlay::new();
        let mut selector = RegionSelector::activate(overlay.clone(), 1.0);
        assert_eq!(selector.key_down("a"), SelectorOutcome::Pending);
        assert!(overlay.state().mounted);
    }

    #[test]
    fn dropping_selector_removes_overlay() {
        let overlay = SharedOverlay::new();
        {
            let mut selector = RegionSelector::activate(overlay.clone(), 1.0);
            selector.pointer_down(5.0, 5.0);
        }
        assert_eq!(overlay.state(), OverlayState::default());
    }

    #[test]
    fn second_injection_is_a_no_op() {
        let (host, _inbox, overlay) = host();
        let page = host.open_page("https://example.com", 1.0);

        host.inject(&page, ScriptRef::RegionSelector).unwrap();
        host.dispatch(page.id, &PageEvent::PointerDown { x: 10.0, y: 10.0 });
        host.inject(&page, ScriptRef::RegionSelector).unwrap();

        // The in-flight drag survived the repeated injection.
        host.dispatch(page.id, &PageEvent::PointerMove { x: 60.0, y: 60.0 });
        assert_eq!(overlay.state().indicator.map(|r| r.width), Some(50.0));
        assert!(host.has_instance(page.id));
    }

    #[test]
    fn selection_is_sent_to_coordinator_and_host_re_arms() {
        let (host, mut inbox, _overlay) = host();
        let page = host.open_page("https://example.com", 1.5);
        host.inject(&page, ScriptRef::RegionSelector).unwrap();

        host.dispatch(page.id, &PageEvent::PointerDown { x: 10.0, y: 20.0 });
        host.dispatch(page.id, &PageEvent::PointerMove { x: 110.0, y: 70.0 });
        let outcome = host.dispatch(page.id, &PageEvent::PointerUp { x: 110.0, y: 70.0 });
        assert!(matches!(outcome, Some(SelectorOutcome::Selected(_))));
        assert!(!host.has_instance(page.id));

        let envelope = inbox.try_recv().unwrap();
        match envelope.message {
            Message::CaptureAreaCoords { coords } => {
                assert_eq!(coords.width, 100.0);
                assert_eq!(coords.device_pixel_ratio, 1.5);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn escape_reports_cancellation() {
        let (host, mut inbox, overlay) = host();
        let page = host.open_page("https://example.com", 1.0);
        host.inject(&page, ScriptRef::RegionSelector).unwrap();
        host.dispatch(page.id, &PageEvent::KeyDown { key: "Escape".to_string() });

        assert!(!overlay.state().mounted);
        assert_eq!(
            inbox.try_recv().unwrap().message,
            Message::AreaSelectionCancelled { page_id: page.id }
        );
    }

    #[test]
    fn closing_page_mid_selection_reports_cancellation() {
        let (host, mut inbox, overlay) = host();
        let page = host.open_page("https://example.com", 1.0);
        host.inject(&page, ScriptRef::RegionSelector).unwrap();
        host.dispatch(page.id, &PageEvent::PointerDown { x: 5.0, y: 5.0 });

        host.close_page(page.id);
        assert!(!overlay.state().mounted);
        assert_eq!(
            inbox.try_recv().unwrap().message,
            Message::AreaSelectionCancelled { page_id: page.id }
        );
    }

    #[test]
    fn closing_idle_page_sends_nothing() {
        let (host, mut inbox, _overlay) = host();
        let page = host.open_page("https://example.com", 1.0);
        host.close_page(page.id);
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn selection_waits_for_room_in_a_full_inbox() {
        let (handle, mut inbox) = CoordinatorHandle::channel(1);
        let host = PageHost::new(handle.clone());
        let page = host.open_page("https://example.com", 1.0);
        host.inject(&page, ScriptRef::RegionSelector).unwrap();
        assert!(handle.send(Message::InitiateAreaCapture));

        host.dispatch(page.id, &PageEvent::PointerDown { x: 0.0, y: 0.0 });
        let outcome = host.dispatch(page.id, &PageEvent::PointerUp { x: 40.0, y: 30.0 });
        assert!(matches!(outcome, Some(SelectorOutcome::Selected(_))));

        assert_eq!(inbox.recv().await.unwrap().message, Message::InitiateAreaCapture);
        match inbox.recv().await.unwrap().message {
            Message::CaptureAreaCoords { coords } => assert_eq!((coords.width, coords.height), (40.0, 30.0)),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn injecting_into_closed_page_fails() {
        let (host, _inbox, _overlay) = host();
        let page = host.open_page("https://example.com", 1.0);
        host.close_page(page.id);
        assert!(matches!(
            host.inject(&page, ScriptRef::RegionSelector),
            Err(CaptureError::InjectionFailed(_))
        ));
        assert!(host.active_page().is_err());
    }
}
