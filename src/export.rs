//! Export sink: encode the committed image and hand it to a download or
//! the clipboard.
//!
//! Exports always read the committed baseline. Any preview still on the
//! surface is discarded first, so an unfinished gesture never leaks into a
//! saved file.

use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::editor::{AnnotationEngine, EditorError};
use crate::error::ErrorKind;

/// How long the "copied" acknowledgment stays up.
pub const COPY_ACK_DURATION: Duration = Duration::from_secs(2);

pub const POPUP_FILENAME: &str = "screenshot.png";
pub const EDITOR_FILENAME: &str = "edited-screenshot.png";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    /// JPEG for `.jpg`/`.jpeg`, PNG for anything else.
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            ImageFormat::Jpeg
        } else {
            ImageFormat::Png
        }
    }
}

/// Encodes `image`. JPEG has no alpha, so it is flattened onto white first.
pub fn encode(image: &RgbaImage, format: ImageFormat) -> Result<Vec<u8>, ExportError> {
    let start = Instant::now();
    let mut bytes = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut bytes);
    let written = match format {
        ImageFormat::Png => DynamicImage::ImageRgba8(image.clone()).write_to(&mut cursor, image::ImageFormat::Png),
        ImageFormat::Jpeg => {
            DynamicImage::ImageRgb8(flatten_onto_white(image)).write_to(&mut cursor, image::ImageFormat::Jpeg)
        }
    };
    written.map_err(|e| ExportError::EncodingFailed(e.to_string()))?;

    log::info!(
        "[EXPORT] Encoded {}x{} as {} ({} bytes) in {}ms",
        image.width(),
        image.height(),
        format.extension(),
        bytes.len(),
        start.elapsed().as_millis()
    );
    Ok(bytes)
}

fn flatten_onto_white(image: &RgbaImage) -> image::RgbImage {
    image::RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let Rgba([r, g, b, a]) = *image.get_pixel(x, y);
        let alpha = a as f32 / 255.0;
        let over = |c: u8| (c as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        image::Rgb([over(r), over(g), over(b)])
    })
}

/// Rejects names that could escape the download directory.
pub fn is_filename_safe(name: &str) -> bool {
    !name.trim().is_empty()
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// File download capability.
pub trait Downloader: Send + Sync {
    /// Writes `bytes` under `filename`. With `prompt_user` the user gets to
    /// confirm or change the target first. Returns where the file landed.
    fn download(&self, bytes: &[u8], filename: &str, prompt_user: bool) -> Result<PathBuf, ExportError>;
}

/// Asked for the final path when a save wants the user's confirmation.
/// `None` means the user backed out.
pub type SavePrompt = Arc<dyn Fn(&Path) -> Option<PathBuf> + Send + Sync>;

/// Saves into a directory, never overwriting an existing file.
pub struct FsDownloader {
    dir: PathBuf,
    prompt: Option<SavePrompt>,
}

impl FsDownloader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: SavePrompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `name.png`, then `name (1).png`, `name (2).png`, ...
    fn unique_target(&self, filename: &str) -> PathBuf {
        let candidate = self.dir.join(filename);
        if !candidate.exists() {
            return candidate;
        }
        let path = Path::new(filename);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(filename);
        let ext = path.extension().and_then(|s| s.to_str());
        (1u32..)
            .map(|n| match ext {
                Some(ext) => self.dir.join(format!("{} ({}).{}", stem, n, ext)),
                None => self.dir.join(format!("{} ({})", stem, n)),
            })
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }
}

impl Downloader for FsDownloader {
    fn download(&self, bytes: &[u8], filename: &str, prompt_user: bool) -> Result<PathBuf, ExportError> {
        if !is_filename_safe(filename) {
            log::warn!("[EXPORT] Refusing unsafe filename {:?}", filename);
            return Err(ExportError::UnsafeFilename(filename.to_string()));
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| ExportError::Download(e.to_string()))?;

        let mut target = self.unique_target(filename);
        if prompt_user {
            if let Some(prompt) = &self.prompt {
                target = prompt(&target).ok_or(ExportError::Cancelled)?;
            }
        }

        std::fs::write(&target, bytes).map_err(|e| ExportError::Download(format!("{}: {}", target.display(), e)))?;
        log::info!("[EXPORT] Saved {} bytes to {}", bytes.len(), target.display());
        Ok(target)
    }
}

/// Clipboard capability.
pub trait ClipboardWriter: Send + Sync {
    fn write_image(&self, bytes: &[u8], mime_type: &str) -> Result<(), ExportError>;
}

/// System clipboard through `arboard`. Takes encoded bytes and puts raw RGBA
/// on the clipboard, which is what `arboard` expects.
pub struct ArboardClipboard;

impl ClipboardWriter for ArboardClipboard {
    fn write_image(&self, bytes: &[u8], mime_type: &str) -> Result<(), ExportError> {
        let rgba = image::load_from_memory(bytes)
            .map_err(|e| ExportError::Clipboard(format!("cannot decode {}: {}", mime_type, e)))?
            .to_rgba8();
        let (width, height) = rgba.dimensions();
        let data = arboard::ImageData {
            width: width as usize,
            height: height as usize,
            bytes: Cow::Owned(rgba.into_raw()),
        };
        let mut clipboard = arboard::Clipboard::new().map_err(|e| ExportError::Clipboard(e.to_string()))?;
        clipboard.set_image(data).map_err(|e| ExportError::Clipboard(e.to_string()))?;
        log::info!("[EXPORT] Copied {}x{} image to clipboard", width, height);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    Idle,
    /// Copy in flight. The control is disabled.
    Copying,
    /// Acknowledgment showing. Still disabled until it reverts.
    Copied,
}

/// State of the copy control, shared by the button and the copy task.
#[derive(Clone)]
pub struct CopyControl {
    state: Arc<Mutex<CopyState>>,
    ack: Duration,
}

impl Default for CopyControl {
    fn default() -> Self {
        Self::new(COPY_ACK_DURATION)
    }
}

impl CopyControl {
    pub fn new(ack: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CopyState::Idle)),
            ack,
        }
    }

    pub fn state(&self) -> CopyState {
        self.state.lock().map(|s| *s).unwrap_or(CopyState::Idle)
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == CopyState::Idle
    }

    fn set(&self, next: CopyState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Idle -> Copying, or `Busy` if the control is disabled.
    fn begin(&self) -> Result<(), ExportError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| ExportError::Clipboard(e.to_string()))?;
        if *state != CopyState::Idle {
            return Err(ExportError::Busy);
        }
        *state = CopyState::Copying;
        Ok(())
    }

    /// Writes `bytes` to the clipboard. On success the control shows
    /// `Copied` and goes back to `Idle` after the acknowledgment delay; on
    /// failure it is re-enabled at once.
    pub async fn copy(
        &self,
        clipboard: Arc<dyn ClipboardWriter>,
        bytes: Vec<u8>,
        format: ImageFormat,
    ) -> Result<(), ExportError> {
        self.begin()?;

        let result = tokio::task::spawn_blocking(move || clipboard.write_image(&bytes, format.mime_type()))
            .await
            .unwrap_or_else(|e| Err(ExportError::Clipboard(format!("clipboard task failed: {}", e))));

        if let Err(e) = result {
            log::warn!("[EXPORT] Copy failed: {}", e);
            self.set(CopyState::Idle);
            return Err(e);
        }

        self.set(CopyState::Copied);
        let state = Arc::clone(&self.state);
        let ack = self.ack;
        tokio::spawn(async move {
            tokio::time::sleep(ack).await;
            if let Ok(mut s) = state.lock() {
                if *s == CopyState::Copied {
                    *s = CopyState::Idle;
                }
            }
        });
        Ok(())
    }
}

/// Save and copy, both fed from the same encoded bytes.
pub struct ExportSink {
    downloader: Arc<dyn Downloader>,
    clipboard: Arc<dyn ClipboardWriter>,
    copy_control: CopyControl,
}

impl ExportSink {
    pub fn new(downloader: Arc<dyn Downloader>, clipboard: Arc<dyn ClipboardWriter>) -> Self {
        Self {
            downloader,
            clipboard,
            copy_control: CopyControl::default(),
        }
    }

    pub fn with_copy_control(mut self, control: CopyControl) -> Self {
        self.copy_control = control;
        self
    }

    pub fn copy_control(&self) -> &CopyControl {
        &self.copy_control
    }

    /// Encodes the committed image. The surface is re-synced to the
    /// baseline first.
    pub fn export_as(&self, engine: &mut AnnotationEngine, format: ImageFormat) -> Result<Vec<u8>, ExportError> {
        if engine.is_empty() {
            return Err(ExportError::Editor(EditorError::EmptySurface));
        }
        engine.discard_preview();
        encode(engine.baseline(), format)
    }

    pub async fn save(
        &self,
        engine: &mut AnnotationEngine,
        filename: &str,
        prompt_user: bool,
    ) -> Result<PathBuf, ExportError> {
        let bytes = self.export_as(engine, ImageFormat::from_filename(filename))?;

        let downloader = Arc::clone(&self.downloader);
        let filename = filename.to_string();
        tokio::task::spawn_blocking(move || downloader.download(&bytes, &filename, prompt_user))
            .await
            .map_err(|e| ExportError::Download(format!("download task failed: {}", e)))?
    }

    pub async fn copy(&self, engine: &mut AnnotationEngine) -> Result<(), ExportError> {
        if !self.copy_control.is_enabled() {
            return Err(ExportError::Busy);
        }
        let bytes = self.export_as(engine, ImageFormat::Png)?;
        self.copy_control
            .copy(Arc::clone(&self.clipboard), bytes, ImageFormat::Png)
            .await
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Editor(#[from] EditorError),

    #[error("Could not encode image: {0}")]
    EncodingFailed(String),

    #[error("Unsafe filename: {0}")]
    UnsafeFilename(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Save cancelled")]
    Cancelled,

    #[error("Clipboard write failed: {0}")]
    Clipboard(String),

    #[error("A copy is already in progress")]
    Busy,
}

impl ExportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::Editor(e) => e.kind(),
            ExportError::EncodingFailed(_) => ErrorKind::EncodingFailed,
            ExportError::UnsafeFilename(_) | ExportError::Cancelled => ErrorKind::EmptyInput,
            ExportError::Download(_) | ExportError::Clipboard(_) => ErrorKind::CaptureFailed,
            ExportError::Busy => ErrorKind::Busy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::raster::Point;
    use crate::editor::session::EditorSession;

    #[derive(Default)]
    struct RecordingClipboard {
        writes: Mutex<Vec<(usize, String)>>,
    }

    impl ClipboardWriter for RecordingClipboard {
        fn write_image(&self, bytes: &[u8], mime_type: &str) -> Result<(), ExportError> {
            self.writes.lock().unwrap().push((bytes.len(), mime_type.to_string()));
            Ok(())
        }
    }

    struct BrokenClipboard;

    impl ClipboardWriter for BrokenClipboard {
        fn write_image(&self, _: &[u8], _: &str) -> Result<(), ExportError> {
            Err(ExportError::Clipboard("no display".to_string()))
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("shotmark-export-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn engine() -> AnnotationEngine {
        let mut engine = AnnotationEngine::new(EditorSession::default());
        engine.load_image(RgbaImage::from_pixel(32, 32, Rgba([255, 255, 255, 255])));
        engine
    }

    #[test]
    fn export_ignores_unfinished_gesture() {
        let sink = ExportSink::new(Arc::new(FsDownloader::new(temp_dir("unused"))), Arc::new(BrokenClipboard));
        let mut engine = engine();
        engine.pointer_down(Point::new(2.0, 2.0)).unwrap();
        engine.pointer_move(Point::new(30.0, 30.0)).unwrap();

        let bytes = sink.export_as(&mut engine, ImageFormat::Png).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert!(decoded.pixels().all(|p| *p == Rgba([255, 255, 255, 255])));
        assert_eq!(engine.surface(), engine.baseline());
    }

    #[test]
    fn export_leaves_pending_crop_marquee_on_screen() {
        let sink = ExportSink::new(Arc::new(FsDownloader::new(temp_dir("unused"))), Arc::new(BrokenClipboard));
        let mut engine = engine();
        engine.set_tool(crate::editor::session::ToolKind::Crop);
        engine.pointer_down(Point::new(4.0, 4.0)).unwrap();
        engine.pointer_up(Point::new(28.0, 28.0)).unwrap();

        let bytes = sink.export_as(&mut engine, ImageFormat::Png).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert!(decoded.pixels().all(|p| *p == Rgba([255, 255, 255, 255])));
        assert!(engine.crop_confirm_visible());
        assert_ne!(engine.surface(), engine.baseline());
    }

    #[test]
    fn empty_engine_has_nothing_to_export() {
        let sink = ExportSink::new(Arc::new(FsDownloader::new(temp_dir("unused"))), Arc::new(BrokenClipboard));
        let mut engine = AnnotationEngine::new(EditorSession::default());
        let err = sink.export_as(&mut engine, ImageFormat::Png).unwrap_err();
        assert!(matches!(err, ExportError::Editor(EditorError::EmptySurface)));
    }

    #[test]
    fn jpeg_is_flattened_onto_white() {
        let transparent = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 0]));
        let bytes = encode(&transparent, ImageFormat::Jpeg).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        let px = decoded.get_pixel(4, 4);
        assert!(px[0] > 240 && px[1] > 240 && px[2] > 240, "expected white, got {:?}", px);
    }

    #[test]
    fn filename_safety() {
        assert!(is_filename_safe(POPUP_FILENAME));
        assert!(is_filename_safe(EDITOR_FILENAME));
        assert!(!is_filename_safe("../escape.png"));
        assert!(!is_filename_safe("nested/shot.png"));
        assert!(!is_filename_safe("  "));
    }

    #[test]
    fn downloads_never_overwrite() {
        let dir = temp_dir("unique");
        let downloader = FsDownloader::new(&dir);
        let first = downloader.download(b"one", POPUP_FILENAME, false).unwrap();
        let second = downloader.download(b"two", POPUP_FILENAME, false).unwrap();
        assert_eq!(first, dir.join("screenshot.png"));
        assert_eq!(second, dir.join("screenshot (1).png"));
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn prompt_can_redirect_or_cancel() {
        let dir = temp_dir("prompt");
        let renamed = dir.join("picked.png");
        let picked = renamed.clone();
        let downloader = FsDownloader::new(&dir).with_prompt(Arc::new(move |_| Some(picked.clone())));
        assert_eq!(downloader.download(b"x", EDITOR_FILENAME, true).unwrap(), renamed);
        // Without prompt_user the suggestion is used as is.
        assert_eq!(
            downloader.download(b"x", EDITOR_FILENAME, false).unwrap(),
            dir.join(EDITOR_FILENAME)
        );

        let cancelling = FsDownloader::new(&dir).with_prompt(Arc::new(|_| None));
        assert!(matches!(
            cancelling.download(b"x", EDITOR_FILENAME, true),
            Err(ExportError::Cancelled)
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test(start_paused = true)]
    async fn copy_acknowledgment_reverts_after_delay() {
        let clipboard = Arc::new(RecordingClipboard::default());
        let sink = ExportSink::new(Arc::new(FsDownloader::new(temp_dir("unused"))), clipboard.clone());
        let mut engine = engine();

        sink.copy(&mut engine).await.unwrap();
        assert_eq!(sink.copy_control().state(), CopyState::Copied);
        assert_eq!(clipboard.writes.lock().unwrap()[0].1, "image/png");

        // Disabled while the acknowledgment shows.
        assert!(matches!(sink.copy(&mut engine).await, Err(ExportError::Busy)));

        tokio::time::sleep(COPY_ACK_DURATION - Duration::from_millis(100)).await;
        assert_eq!(sink.copy_control().state(), CopyState::Copied);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.copy_control().state(), CopyState::Idle);
        sink.copy(&mut engine).await.unwrap();
        assert_eq!(clipboard.writes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_copy_re_enables_control() {
        let sink = ExportSink::new(Arc::new(FsDownloader::new(temp_dir("unused"))), Arc::new(BrokenClipboard));
        let mut engine = engine();
        assert!(matches!(sink.copy(&mut engine).await, Err(ExportError::Clipboard(_))));
        assert_eq!(sink.copy_control().state(), CopyState::Idle);
    }

    #[tokio::test]
    async fn save_writes_committed_png() {
        let dir = temp_dir("save");
        let sink = ExportSink::new(Arc::new(FsDownloader::new(&dir)), Arc::new(BrokenClipboard));
        let mut engine = engine();
        let path = sink.save(&mut engine, POPUP_FILENAME, false).await.unwrap();
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
