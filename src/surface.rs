//! UI surfaces: the popup and the standalone editor.
//!
//! A surface owns one `AnnotationEngine` (and with it one editor session),
//! one `ExportSink`, and a view of the handoff `Delivery`. It can be opened
//! and closed at any time, so it never waits on the coordinator for an area
//! capture: it polls the store on start and again whenever the bus hints
//! that something arrived.

use image::RgbaImage;
use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::editor::AnnotationEngine;
use crate::error::ErrorKind;
use crate::export::{ExportError, ExportSink, ImageFormat, EDITOR_FILENAME, POPUP_FILENAME};
use crate::handoff::{Channel, Delivery, HandoffEntry, Pending};
use crate::messaging::{CoordinatorHandle, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Short-lived toolbar popup.
    Popup,
    /// Standalone editor in its own tab.
    Tab,
}

impl SurfaceKind {
    /// Name recorded on handoff entries this surface consumes.
    pub fn consumer(&self) -> &'static str {
        match self {
            SurfaceKind::Popup => "popup",
            SurfaceKind::Tab => "editor",
        }
    }

    pub fn default_filename(&self) -> &'static str {
        match self {
            SurfaceKind::Popup => POPUP_FILENAME,
            SurfaceKind::Tab => EDITOR_FILENAME,
        }
    }

    /// The editor asks where to save; the popup saves straight away.
    pub fn prompts_on_save(&self) -> bool {
        matches!(self, SurfaceKind::Tab)
    }
}

/// What the user gets told.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Loaded { width: u32, height: u32 },
    NoImage,
    Saved(PathBuf),
    Copied,
    /// Image handed to the standalone editor.
    SentToEditor,
    Failed { kind: ErrorKind, message: String },
}

impl Notice {
    fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        log::warn!("[SURFACE] {} ({})", message, kind);
        Notice::Failed { kind, message }
    }
}

pub struct EditorSurface {
    kind: SurfaceKind,
    engine: AnnotationEngine,
    delivery: Delivery,
    sink: ExportSink,
}

impl EditorSurface {
    pub fn new(kind: SurfaceKind, engine: AnnotationEngine, delivery: Delivery, sink: ExportSink) -> Self {
        Self {
            kind,
            engine,
            delivery,
            sink,
        }
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn engine(&self) -> &AnnotationEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AnnotationEngine {
        &mut self.engine
    }

    pub fn sink(&self) -> &ExportSink {
        &self.sink
    }

    /// Subscribe before `start` so nothing published in between is missed.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.delivery.bus().subscribe()
    }

    /// Startup poll. The standalone editor first looks for an image sent to
    /// it from the popup; both kinds then pick up a pending capture outcome.
    pub fn start(&mut self) -> Notice {
        log::info!("[SURFACE] {} starting", self.kind.consumer());
        if self.kind == SurfaceKind::Tab {
            match self.take_editor_image() {
                Ok(Some(notice)) => return notice,
                Ok(None) => {}
                Err(notice) => return notice,
            }
        }
        self.consume_pending().unwrap_or(Notice::NoImage)
    }

    fn take_editor_image(&mut self) -> Result<Option<Notice>, Notice> {
        let entry = self
            .delivery
            .store()
            .read_and_clear(Channel::EditorImage, self.kind.consumer())
            .map_err(|e| Notice::failed(ErrorKind::CaptureFailed, e.to_string()))?;
        let Some(entry) = entry else {
            return Ok(None);
        };
        match entry.image_bytes() {
            Ok(Some(bytes)) => Ok(Some(self.load(&bytes))),
            Ok(None) => Ok(None),
            Err(e) => Err(Notice::failed(ErrorKind::EncodingFailed, e.to_string())),
        }
    }

    /// Reacts to a bus hint. The payload is not trusted: whatever is in the
    /// store wins, and a hint whose entry was already taken does nothing.
    pub fn handle_notification(&mut self, message: &Message) -> Option<Notice> {
        match message {
            Message::AreaCaptured { .. } | Message::AreaCaptureFailed { .. } => self.consume_pending(),
            _ => None,
        }
    }

    fn consume_pending(&mut self) -> Option<Notice> {
        match self.delivery.take_pending(self.kind.consumer()) {
            Ok(Some(Pending::Image(bytes))) => Some(self.load(&bytes)),
            Ok(Some(Pending::Failed(error))) => {
                Some(Notice::failed(error.kind, format!("Could not capture selected area: {}", error.message)))
            }
            Ok(None) => None,
            Err(e) => Some(Notice::failed(ErrorKind::CaptureFailed, e.to_string())),
        }
    }

    fn load(&mut self, png: &[u8]) -> Notice {
        match self.engine.load_png(png) {
            Ok(()) => {
                let (width, height) = self.engine.dimensions();
                Notice::Loaded { width, height }
            }
            Err(e) => Notice::failed(e.kind(), e.to_string()),
        }
    }

    /// Full viewport capture. The surface is emptied before asking.
    pub async fn request_full_capture(&mut self, coordinator: &CoordinatorHandle) -> Notice {
        self.engine.clear();
        match coordinator.capture().await {
            Ok(png) => self.load(&png),
            Err(e) => Notice::failed(e.kind(), format!("Full page capture failed: {}", e)),
        }
    }

    /// Starts the selector. The outcome arrives later through the store, so
    /// there is only something to report when the request itself fails.
    pub async fn request_area_capture(&mut self, coordinator: &CoordinatorHandle) -> Option<Notice> {
        match coordinator.initiate_area_capture().await {
            Ok(()) => None,
            // The coordinator stored this failure too. Consuming it here keeps
            // the bus hint and later surfaces from reporting it again.
            Err(e) => self
                .consume_pending()
                .or_else(|| Some(Notice::failed(e.kind(), format!("Could not start area capture: {}", e)))),
        }
    }

    /// Encoded committed image, preview discarded.
    pub fn export_as(&mut self, format: ImageFormat) -> Result<Vec<u8>, ExportError> {
        self.sink.export_as(&mut self.engine, format)
    }

    /// Hands the committed image to the standalone editor.
    pub fn open_in_editor(&mut self) -> Notice {
        if self.engine.is_empty() {
            return Notice::failed(ErrorKind::EmptyInput, "No image to edit");
        }
        let png = match self.export_as(ImageFormat::Png) {
            Ok(png) => png,
            Err(e) => return Notice::failed(e.kind(), e.to_string()),
        };
        match self
            .delivery
            .store()
            .write(Channel::EditorImage, &HandoffEntry::image(&png))
        {
            Ok(()) => Notice::SentToEditor,
            Err(e) => Notice::failed(ErrorKind::CaptureFailed, e.to_string()),
        }
    }

    pub async fn save(&mut self) -> Notice {
        let filename = self.kind.default_filename();
        match self
            .sink
            .save(&mut self.engine, filename, self.kind.prompts_on_save())
            .await
        {
            Ok(path) => Notice::Saved(path),
            Err(e) => export_failure(e, "Canvas is empty. Nothing to save."),
        }
    }

    pub async fn copy(&mut self) -> Notice {
        match self.sink.copy(&mut self.engine).await {
            Ok(()) => Notice::Copied,
            Err(e) => export_failure(e, "No image to copy."),
        }
    }

    /// Replaces the surface contents directly, e.g. with an image from disk.
    pub fn load_image(&mut self, image: RgbaImage) -> Notice {
        self.engine.load_image(image);
        let (width, height) = self.engine.dimensions();
        Notice::Loaded { width, height }
    }
}

fn export_failure(error: ExportError, empty_message: &str) -> Notice {
    match error {
        ExportError::Editor(crate::editor::EditorError::EmptySurface) => {
            Notice::failed(ErrorKind::EmptyInput, empty_message)
        }
        other => Notice::failed(other.kind(), other.to_string()),
    }
}
