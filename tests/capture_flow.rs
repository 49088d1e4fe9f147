//! End-to-end capture flows: coordinator task, page host, handoff store and
//! UI surfaces wired together the way the binary wires them, with an
//! in-memory viewport standing in for the screen.

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use shotmark_lib::capture::{CaptureCoordinator, CaptureError, ViewportSnapshot};
use shotmark_lib::editor::raster::Point;
use shotmark_lib::editor::session::EditorSession;
use shotmark_lib::editor::AnnotationEngine;
use shotmark_lib::error::ErrorKind;
use shotmark_lib::export::{ClipboardWriter, ExportError, ExportSink, FsDownloader};
use shotmark_lib::handoff::store::{FileStore, KeyValueStore, MemoryStore};
use shotmark_lib::handoff::{Channel, Delivery, HandoffStore, Pending};
use shotmark_lib::messaging::{CoordinatorHandle, Message, UiBus};
use shotmark_lib::selector::{PageEvent, PageHost, SelectorOutcome};
use shotmark_lib::surface::{EditorSurface, Notice, SurfaceKind};

const BACKGROUND: Rgba<u8> = Rgba([240, 240, 240, 255]);

struct FakeViewport {
    width: u32,
    height: u32,
    calls: AtomicUsize,
}

impl ViewportSnapshot for FakeViewport {
    fn capture(&self) -> Result<Vec<u8>, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(self.width, self.height, BACKGROUND));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .map_err(|e| CaptureError::EncodingFailed(e.to_string()))?;
        Ok(out)
    }
}

struct NullClipboard;

impl ClipboardWriter for NullClipboard {
    fn write_image(&self, _: &[u8], _: &str) -> Result<(), ExportError> {
        Ok(())
    }
}

struct Harness {
    handle: CoordinatorHandle,
    host: Arc<PageHost>,
    delivery: Delivery,
    viewport: Arc<FakeViewport>,
}

fn harness(kv: Arc<dyn KeyValueStore>, width: u32, height: u32) -> Harness {
    let delivery = Delivery::new(Arc::new(HandoffStore::new(kv)), UiBus::default());
    let (handle, inbox) = CoordinatorHandle::channel(16);
    let host = Arc::new(PageHost::new(handle.clone()));
    let viewport = Arc::new(FakeViewport {
        width,
        height,
        calls: AtomicUsize::new(0),
    });
    let coordinator = Arc::new(CaptureCoordinator::new(
        viewport.clone(),
        host.clone(),
        host.clone(),
        delivery.clone(),
    ));
    tokio::spawn(coordinator.serve(inbox));
    Harness {
        handle,
        host,
        delivery,
        viewport,
    }
}

fn surface(kind: SurfaceKind, delivery: &Delivery) -> EditorSurface {
    let dir = std::env::temp_dir().join(format!("shotmark-flow-{}", std::process::id()));
    EditorSurface::new(
        kind,
        AnnotationEngine::new(EditorSession::default()),
        delivery.clone(),
        ExportSink::new(Arc::new(FsDownloader::new(dir)), Arc::new(NullClipboard)),
    )
}

fn drag(host: &PageHost, page_id: u64, from: (f64, f64), to: (f64, f64)) -> Option<SelectorOutcome> {
    host.dispatch(page_id, &PageEvent::PointerDown { x: from.0, y: from.1 });
    host.dispatch(page_id, &PageEvent::PointerMove { x: to.0, y: to.1 });
    host.dispatch(page_id, &PageEvent::PointerUp { x: to.0, y: to.1 })
}

async fn next_hint(rx: &mut broadcast::Receiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(20), rx.recv())
        .await
        .expect("timed out waiting for coordinator")
        .expect("bus closed")
}

// ── Area capture ────────────────────────────────────────────────────

#[tokio::test]
async fn area_capture_survives_closed_popup() {
    let h = harness(Arc::new(MemoryStore::new()), 3840, 2160);
    let page = h.host.open_page("https://example.com/article", 2.0);
    let mut hints = h.delivery.bus().subscribe();

    {
        let mut popup = surface(SurfaceKind::Popup, &h.delivery);
        assert_eq!(popup.start(), Notice::NoImage);
        assert_eq!(popup.request_area_capture(&h.handle).await, None);
        // Popup loses focus and closes while the user drags.
    }
    assert!(h.host.has_instance(page.id));

    let outcome = drag(&h.host, page.id, (100.0, 50.0), (300.0, 200.0));
    assert!(matches!(outcome, Some(SelectorOutcome::Selected(_))));
    assert!(!h.host.has_instance(page.id));

    assert!(matches!(next_hint(&mut hints).await, Message::AreaCaptured { .. }));

    let mut reopened = surface(SurfaceKind::Popup, &h.delivery);
    assert_eq!(reopened.start(), Notice::Loaded { width: 400, height: 300 });
    assert!(h.delivery.store().peek(Channel::CaptureResult).unwrap().is_none());

    // Exactly once: the next surface finds nothing.
    let mut another = surface(SurfaceKind::Popup, &h.delivery);
    assert_eq!(another.start(), Notice::NoImage);
}

#[tokio::test]
async fn live_popup_dedupes_hint_and_store() {
    let h = harness(Arc::new(MemoryStore::new()), 800, 600);
    let page = h.host.open_page("https://example.com", 1.0);

    let mut popup = surface(SurfaceKind::Popup, &h.delivery);
    let mut hints = popup.subscribe();
    popup.start();
    popup.request_area_capture(&h.handle).await;
    drag(&h.host, page.id, (10.0, 10.0), (110.0, 60.0));

    let hint = next_hint(&mut hints).await;
    assert_eq!(popup.handle_notification(&hint), Some(Notice::Loaded { width: 100, height: 50 }));
    // The same hint delivered twice changes nothing.
    assert_eq!(popup.handle_notification(&hint), None);
    assert_eq!(popup.engine().dimensions(), (100, 50));
}

#[tokio::test]
async fn restricted_page_is_reported_without_injection() {
    let h = harness(Arc::new(MemoryStore::new()), 100, 100);
    let page = h.host.open_page("chrome://extensions", 1.0);

    let result = h.handle.initiate_area_capture().await;
    assert!(matches!(result, Err(CaptureError::RestrictedPage(_))));
    assert!(!h.host.has_instance(page.id));
    assert_eq!(h.viewport.calls.load(Ordering::SeqCst), 0);

    let entry = h.delivery.store().peek(Channel::CaptureError).unwrap().unwrap();
    assert_eq!(entry.error.unwrap().kind, ErrorKind::RestrictedPage);
}

#[tokio::test]
async fn escape_cancels_and_allows_retry() {
    let h = harness(Arc::new(MemoryStore::new()), 200, 200);
    let page = h.host.open_page("https://example.com", 1.0);

    h.handle.initiate_area_capture().await.unwrap();
    h.host.dispatch(page.id, &PageEvent::PointerDown { x: 5.0, y: 5.0 });
    let outcome = h.host.dispatch(
        page.id,
        &PageEvent::KeyDown {
            key: "Escape".to_string(),
        },
    );
    assert_eq!(outcome, Some(SelectorOutcome::Cancelled));
    assert!(!h.host.has_instance(page.id));

    // The inbox is FIFO: the cancellation lands before this request.
    h.handle.initiate_area_capture().await.unwrap();
    assert!(h.host.has_instance(page.id));
    assert_eq!(h.viewport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn closing_page_mid_selection_frees_the_coordinator() {
    let h = harness(Arc::new(MemoryStore::new()), 200, 200);
    let page = h.host.open_page("https://example.com", 1.0);

    h.handle.initiate_area_capture().await.unwrap();
    assert!(h.host.has_instance(page.id));
    h.host.close_page(page.id);

    let next = h.host.open_page("https://example.org", 1.0);
    h.handle.initiate_area_capture().await.unwrap();
    assert!(h.host.has_instance(next.id));
}

#[tokio::test]
async fn result_written_before_restart_is_picked_up() {
    let path = std::env::temp_dir().join(format!("shotmark-flow-store-{}.json", std::process::id()));
    let _ = std::fs::remove_file(&path);

    {
        let h = harness(Arc::new(FileStore::new(&path)), 640, 480);
        let page = h.host.open_page("https://example.com", 1.0);
        let mut hints = h.delivery.bus().subscribe();
        h.handle.initiate_area_capture().await.unwrap();
        drag(&h.host, page.id, (0.0, 0.0), (64.0, 48.0));
        next_hint(&mut hints).await;
    }

    // A fresh store over the same file, as after a restart.
    let delivery = Delivery::new(
        Arc::new(HandoffStore::new(Arc::new(FileStore::new(&path)))),
        UiBus::default(),
    );
    match delivery.take_pending("editor").unwrap() {
        Some(Pending::Image(png)) => {
            let img = image::load_from_memory(&png).unwrap();
            assert_eq!((img.width(), img.height()), (64, 48));
        }
        other => panic!("expected stored image, got {:?}", other),
    }
    assert!(delivery.take_pending("editor").unwrap().is_none());
    let _ = std::fs::remove_file(&path);
}

// ── Full capture → annotate → export ────────────────────────────────

#[tokio::test]
async fn full_capture_draw_export_keeps_size_and_stroke() {
    let h = harness(Arc::new(MemoryStore::new()), 1920, 1080);
    h.host.open_page("https://example.com", 1.0);

    let mut popup = surface(SurfaceKind::Popup, &h.delivery);
    assert_eq!(
        popup.request_full_capture(&h.handle).await,
        Notice::Loaded {
            width: 1920,
            height: 1080
        }
    );

    let engine = popup.engine_mut();
    engine.pointer_down(Point::new(100.0, 500.0)).unwrap();
    engine.pointer_move(Point::new(900.0, 500.0)).unwrap();
    engine.pointer_up(Point::new(900.0, 500.0)).unwrap();

    let png = popup.export_as(Default::default()).unwrap();
    let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (1920, 1080));
    assert_eq!(*decoded.get_pixel(500, 500), Rgba([255, 0, 0, 255]));
    assert_eq!(*decoded.get_pixel(500, 100), BACKGROUND);
}

#[tokio::test]
async fn opening_in_editor_transfers_committed_image() {
    let h = harness(Arc::new(MemoryStore::new()), 300, 200);
    h.host.open_page("https://example.com", 1.0);

    let mut popup = surface(SurfaceKind::Popup, &h.delivery);
    popup.request_full_capture(&h.handle).await;
    {
        let engine = popup.engine_mut();
        engine.pointer_down(Point::new(10.0, 10.0)).unwrap();
        engine.pointer_move(Point::new(200.0, 10.0)).unwrap();
        // Still dragging when the user hits "open in editor".
    }
    assert_eq!(popup.open_in_editor(), Notice::SentToEditor);
    drop(popup);

    let mut editor = surface(SurfaceKind::Tab, &h.delivery);
    assert_eq!(editor.start(), Notice::Loaded { width: 300, height: 200 });
    // The unfinished stroke was not part of the committed image.
    assert_eq!(*editor.engine().baseline().get_pixel(100, 10), BACKGROUND);
}
