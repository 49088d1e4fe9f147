//! Annotation engine: tool state machine over a raster surface.
//!
//! Two buffers: `baseline` is the last committed image, `surface` is what is
//! on screen. Previews are rendered by copying the baseline into the surface
//! and drawing the in-progress shape on top, so a burst of pointer moves
//! only ever shows the latest position. A commit copies the surface into the
//! baseline.
//!
//! Draw is the exception: strokes accumulate directly on the surface and are
//! committed when the pointer is released or leaves.

pub mod raster;
pub mod session;
pub mod text;

use ab_glyph::FontArc;
use image::{DynamicImage, RgbaImage};

use crate::capture::geometry::{validate_bounds, GeometryError, PixelRect};
use crate::error::ErrorKind;
use raster::Point;
use session::{EditorSession, ToolKind};

/// Crop drags must exceed this in both dimensions to offer the confirm action.
pub const MIN_CROP_PX: f32 = 5.0;

/// Crop selection in surface coordinates, as dragged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRegion {
    pub start_x: f32,
    pub start_y: f32,
    pub end_x: f32,
    pub end_y: f32,
}

impl CropRegion {
    fn at(p: Point) -> Self {
        Self {
            start_x: p.x,
            start_y: p.y,
            end_x: p.x,
            end_y: p.y,
        }
    }

    pub fn width(&self) -> f32 {
        (self.end_x - self.start_x).abs()
    }

    pub fn height(&self) -> f32 {
        (self.end_y - self.start_y).abs()
    }

    fn exceeds(&self, min: f32) -> bool {
        self.width() > min && self.height() > min
    }

    /// Whole-pixel bounds. Each edge rounds to the nearest pixel on its own,
    /// so a drag that stays inside the image never rounds past its edge.
    pub fn to_pixels(&self) -> Option<PixelRect> {
        let left = self.start_x.min(self.end_x).round();
        let top = self.start_y.min(self.end_y).round();
        let right = self.start_x.max(self.end_x).round();
        let bottom = self.start_y.max(self.end_y).round();
        if left < 0.0 || top < 0.0 {
            return None;
        }
        Some(PixelRect::new(
            left as u32,
            top as u32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }

    fn start(&self) -> Point {
        Point::new(self.start_x, self.start_y)
    }

    fn end(&self) -> Point {
        Point::new(self.end_x, self.end_y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Gesture {
    Idle,
    Stroke { last: Point },
    Shape { start: Point },
    Crop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingCrop {
    region: CropRegion,
    confirm_visible: bool,
}

pub struct AnnotationEngine {
    surface: RgbaImage,
    baseline: RgbaImage,
    session: EditorSession,
    gesture: Gesture,
    crop: Option<PendingCrop>,
    font: Option<FontArc>,
}

impl AnnotationEngine {
    /// An empty (0x0) engine. Only `load_image` works until something is loaded.
    pub fn new(session: EditorSession) -> Self {
        Self {
            surface: RgbaImage::new(0, 0),
            baseline: RgbaImage::new(0, 0),
            session,
            gesture: Gesture::Idle,
            crop: None,
            font: None,
        }
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn set_font(&mut self, font: Option<FontArc>) {
        self.font = font;
    }

    pub fn session(&self) -> &EditorSession {
        &self.session
    }

    /// Style changes apply to the next gesture.
    pub fn session_mut(&mut self) -> &mut EditorSession {
        &mut self.session
    }

    pub fn tool(&self) -> ToolKind {
        self.session.tool
    }

    /// What the user currently sees, previews included.
    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    /// The committed image.
    pub fn baseline(&self) -> &RgbaImage {
        &self.baseline
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.baseline.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.baseline.width() == 0 || self.baseline.height() == 0
    }

    pub fn is_gesture_active(&self) -> bool {
        self.gesture != Gesture::Idle
    }

    pub fn crop_confirm_visible(&self) -> bool {
        self.crop.is_some_and(|c| c.confirm_visible)
    }

    pub fn pending_crop(&self) -> Option<CropRegion> {
        self.crop.map(|c| c.region)
    }

    /// Replaces the image, commits it, and selects Draw.
    pub fn load_image(&mut self, image: RgbaImage) {
        log::info!("[EDITOR] Loaded {}x{} image", image.width(), image.height());
        self.surface = image.clone();
        self.baseline = image;
        self.set_tool(ToolKind::Draw);
    }

    /// Back to an empty surface, Draw selected.
    pub fn clear(&mut self) {
        self.surface = RgbaImage::new(0, 0);
        self.baseline = RgbaImage::new(0, 0);
        self.set_tool(ToolKind::Draw);
    }

    pub fn load_png(&mut self, bytes: &[u8]) -> Result<(), EditorError> {
        let image = image::load_from_memory(bytes).map_err(|e| EditorError::DecodeFailed(e.to_string()))?;
        self.load_image(image.to_rgba8());
        Ok(())
    }

    /// Switches tool. Any in-flight gesture and pending crop are dropped and
    /// the surface goes back to the committed image, even when `tool` is
    /// already active. The baseline itself is never touched.
    pub fn set_tool(&mut self, tool: ToolKind) {
        self.gesture = Gesture::Idle;
        self.crop = None;
        self.restore_baseline();
        if self.session.tool != tool {
            log::debug!("[EDITOR] Tool {} -> {}", self.session.tool.name(), tool.name());
        }
        self.session.tool = tool;
    }

    /// Throws away anything drawn since the last commit, including a stroke
    /// that is still in progress. A finished crop selection is kept and its
    /// marquee redrawn; one still being dragged is dropped.
    pub fn discard_preview(&mut self) {
        if self.gesture == Gesture::Crop {
            self.crop = None;
        }
        self.gesture = Gesture::Idle;
        self.render_crop_preview();
    }

    pub fn pointer_down(&mut self, pos: Point) -> Result<(), EditorError> {
        self.ensure_not_empty()?;
        match self.session.tool {
            ToolKind::Draw => {
                self.gesture = Gesture::Stroke { last: pos };
            }
            ToolKind::Crop => {
                self.restore_baseline();
                self.crop = Some(PendingCrop {
                    region: CropRegion::at(pos),
                    confirm_visible: false,
                });
                self.gesture = Gesture::Crop;
            }
            ToolKind::Text => self.commit_text(pos)?,
            ToolKind::Rectangle | ToolKind::Ellipse => {
                self.gesture = Gesture::Shape { start: pos };
            }
        }
        Ok(())
    }

    pub fn pointer_move(&mut self, pos: Point) -> Result<(), EditorError> {
        self.ensure_not_empty()?;
        match self.gesture {
            Gesture::Idle => {}
            Gesture::Stroke { last } => {
                let style = &self.session.style;
                raster::draw_segment(&mut self.surface, last, pos, style.color, style.line_width);
                self.gesture = Gesture::Stroke { last: pos };
            }
            Gesture::Crop => {
                if let Some(crop) = self.crop.as_mut() {
                    crop.region.end_x = pos.x;
                    crop.region.end_y = pos.y;
                }
                self.render_crop_preview();
            }
            Gesture::Shape { start } => {
                self.restore_baseline();
                self.render_shape(start, pos);
            }
        }
        Ok(())
    }

    pub fn pointer_up(&mut self, pos: Point) -> Result<(), EditorError> {
        self.ensure_not_empty()?;
        match self.gesture {
            Gesture::Idle => {}
            Gesture::Stroke { .. } => {
                self.gesture = Gesture::Idle;
                self.commit();
            }
            Gesture::Crop => {
                self.gesture = Gesture::Idle;
                if let Some(crop) = self.crop.as_mut() {
                    crop.region.end_x = pos.x;
                    crop.region.end_y = pos.y;
                }
                self.finish_crop_selection();
            }
            Gesture::Shape { start } => {
                self.gesture = Gesture::Idle;
                self.restore_baseline();
                self.render_shape(start, pos);
                self.commit();
            }
        }
        Ok(())
    }

    /// The pointer left the surface mid-gesture.
    ///
    /// A stroke keeps what was drawn, a crop keeps a usable selection, and a
    /// shape preview is abandoned.
    pub fn pointer_leave(&mut self) {
        match self.gesture {
            Gesture::Idle => {}
            Gesture::Stroke { .. } => {
                self.gesture = Gesture::Idle;
                self.commit();
            }
            Gesture::Crop => {
                self.gesture = Gesture::Idle;
                self.finish_crop_selection();
            }
            Gesture::Shape { .. } => {
                self.gesture = Gesture::Idle;
                self.restore_baseline();
                log::debug!("[EDITOR] Shape cancelled: pointer left the surface");
            }
        }
    }

    /// The confirm action of the crop tool.
    ///
    /// Resizes the image to the selection. With no selection, or one that
    /// rounds to nothing, it only returns to Draw.
    pub fn apply_crop(&mut self) -> Result<(), EditorError> {
        self.ensure_not_empty()?;
        let Some(crop) = self.crop.filter(|c| c.confirm_visible) else {
            self.set_tool(ToolKind::Draw);
            return Ok(());
        };

        let Some(bounds) = crop.region.to_pixels() else {
            return Err(EditorError::OutOfBounds(GeometryError::OutOfBounds {
                requested: (
                    crop.region.start_x as f64,
                    crop.region.start_y as f64,
                    crop.region.width() as f64,
                    crop.region.height() as f64,
                ),
                image_size: self.dimensions(),
            }));
        };
        if bounds.width < 1 || bounds.height < 1 {
            self.set_tool(ToolKind::Draw);
            return Ok(());
        }

        let (width, height) = self.dimensions();
        validate_bounds(bounds, width, height).map_err(EditorError::OutOfBounds)?;

        let (x, y, w, h) = bounds.as_tuple();
        let cropped = image::imageops::crop_imm(&self.baseline, x, y, w, h).to_image();
        log::info!("[EDITOR] Cropped {}x{} -> {}x{} at {},{}", width, height, w, h, x, y);
        self.baseline = cropped;
        self.set_tool(ToolKind::Draw);
        Ok(())
    }

    /// PNG encoding of the committed image.
    pub fn committed_png(&self) -> Result<Vec<u8>, EditorError> {
        self.ensure_not_empty()?;
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(self.baseline.clone())
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| EditorError::EncodingFailed(e.to_string()))?;
        Ok(bytes)
    }

    fn commit_text(&mut self, pos: Point) -> Result<(), EditorError> {
        let text = self.session.style.text.trim().to_string();
        if text.is_empty() {
            log::warn!("[EDITOR] Text tool used with empty input");
            return Err(EditorError::EmptyInput);
        }
        let font = self
            .font
            .clone()
            .ok_or_else(|| EditorError::FontUnavailable("no font configured".to_string()))?;

        self.restore_baseline();
        let style = &self.session.style;
        text::draw_text(&mut self.surface, &font, &text, pos, style.font_size, style.color);
        self.commit();
        Ok(())
    }

    fn finish_crop_selection(&mut self) {
        match self.crop.as_mut() {
            Some(crop) if crop.region.exceeds(MIN_CROP_PX) => {
                crop.confirm_visible = true;
                self.render_crop_preview();
            }
            _ => {
                self.crop = None;
                self.restore_baseline();
            }
        }
    }

    fn render_crop_preview(&mut self) {
        self.restore_baseline();
        if let Some(crop) = self.crop {
            raster::dashed_rect(&mut self.surface, crop.region.start(), crop.region.end());
        }
    }

    fn render_shape(&mut self, start: Point, end: Point) {
        let style = &self.session.style;
        match self.session.tool {
            ToolKind::Rectangle => {
                if style.fill {
                    raster::fill_rect(&mut self.surface, start, end, style.color);
                }
                raster::stroke_rect(&mut self.surface, start, end, style.color, style.line_width);
            }
            ToolKind::Ellipse => {
                let (center, rx, ry) = raster::ellipse_in_box(start, end);
                if style.fill {
                    raster::fill_ellipse(&mut self.surface, center, rx, ry, style.color);
                }
                raster::stroke_ellipse(&mut self.surface, center, rx, ry, style.color, style.line_width);
            }
            _ => {}
        }
    }

    fn restore_baseline(&mut self) {
        self.surface.clone_from(&self.baseline);
    }

    fn commit(&mut self) {
        self.baseline.clone_from(&self.surface);
        log::debug!("[EDITOR] Committed {} stroke", self.session.tool.name());
    }

    fn ensure_not_empty(&self) -> Result<(), EditorError> {
        if self.is_empty() {
            Err(EditorError::EmptySurface)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EditorError {
    #[error("No image loaded")]
    EmptySurface,

    #[error("Please enter text")]
    EmptyInput,

    #[error("Text tool font unavailable: {0}")]
    FontUnavailable(String),

    #[error("Crop is outside the image: {0}")]
    OutOfBounds(GeometryError),

    #[error("Could not decode image: {0}")]
    DecodeFailed(String),

    #[error("Could not encode image: {0}")]
    EncodingFailed(String),
}

impl EditorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EditorError::EmptySurface | EditorError::EmptyInput => ErrorKind::EmptyInput,
            EditorError::FontUnavailable(_) => ErrorKind::EmptyInput,
            EditorError::OutOfBounds(_) => ErrorKind::OutOfBounds,
            EditorError::DecodeFailed(_) | EditorError::EncodingFailed(_) => ErrorKind::EncodingFailed,
        }
    }
}
