//! Text tool rendering with `ab_glyph`.

use ab_glyph::{point, Font, FontArc, GlyphId, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};

use super::raster::{blend_pixel, Point};
use super::EditorError;

/// Common sans-serif fonts, tried in order when none is configured.
const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

pub fn find_system_font() -> Option<PathBuf> {
    SYSTEM_FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

pub fn load_font(path: &Path) -> Result<FontArc, EditorError> {
    let bytes = std::fs::read(path)
        .map_err(|e| EditorError::FontUnavailable(format!("{}: {}", path.display(), e)))?;
    FontArc::try_from_vec(bytes)
        .map_err(|e| EditorError::FontUnavailable(format!("{}: {}", path.display(), e)))
}

/// Draws `text` with its alphabetic baseline starting at `origin`.
pub fn draw_text(img: &mut RgbaImage, font: &FontArc, text: &str, origin: Point, size: f32, color: Rgba<u8>) {
    let scale = PxScale::from(size);
    let scaled = font.as_scaled(scale);

    let mut caret = point(origin.x, origin.y);
    let mut previous: Option<GlyphId> = None;
    for c in text.chars().filter(|c| !c.is_control()) {
        let id = scaled.glyph_id(c);
        if let Some(prev) = previous {
            caret.x += scaled.kern(prev, id);
        }
        let glyph = id.with_scale_and_position(scale, caret);
        caret.x += scaled.h_advance(id);
        previous = Some(id);

        if let Some(outlined) = font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let x = bounds.min.x as i64 + gx as i64;
                let y = bounds.min.y as i64 + gy as i64;
                blend_pixel(img, x, y, color, coverage);
            });
        }
    }
}
