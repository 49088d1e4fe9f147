//! Pixel rasterization over `RgbaImage`: round-capped segments, rectangles,
//! ellipses and the dashed crop marquee. Source-over blending, coverage-based
//! edge smoothing.

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Surface-space position (canvas pixels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Marquee drawn while dragging a crop.
pub const CROP_MARQUEE_COLOR: Rgba<u8> = Rgba([255, 0, 0, 178]);
const CROP_MARQUEE_DASH: (f32, f32) = (4.0, 2.0);

/// Blends `color` into one pixel with the given coverage in 0..=1.
pub fn blend_pixel(img: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>, coverage: f32) {
    if x < 0 || y < 0 || x >= img.width() as i64 || y >= img.height() as i64 {
        return;
    }
    let alpha = (color[3] as f32 / 255.0) * coverage.clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }

    let dst = img.get_pixel_mut(x as u32, y as u32);
    let dst_alpha = dst[3] as f32 / 255.0;
    let out_alpha = alpha + dst_alpha * (1.0 - alpha);
    for c in 0..3 {
        let src = color[c] as f32 / 255.0;
        let below = dst[c] as f32 / 255.0;
        let mixed = if out_alpha > 0.0 {
            (src * alpha + below * dst_alpha * (1.0 - alpha)) / out_alpha
        } else {
            0.0
        };
        dst[c] = (mixed * 255.0).round() as u8;
    }
    dst[3] = (out_alpha * 255.0).round() as u8;
}

fn distance_to_segment(px: f32, py: f32, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (((px - a.x) * dx + (py - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a.x + t * dx, a.y + t * dy);
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

/// Straight segment with round caps, `width` pixels wide.
pub fn draw_segment(img: &mut RgbaImage, a: Point, b: Point, color: Rgba<u8>, width: f32) {
    let radius = (width / 2.0).max(0.5);
    let pad = radius + 1.0;
    let min_x = (a.x.min(b.x) - pad).floor().max(0.0) as i64;
    let min_y = (a.y.min(b.y) - pad).floor().max(0.0) as i64;
    let max_x = ((a.x.max(b.x) + pad).ceil() as i64).min(img.width() as i64 - 1);
    let max_y = ((a.y.max(b.y) + pad).ceil() as i64).min(img.height() as i64 - 1);

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let d = distance_to_segment(x as f32 + 0.5, y as f32 + 0.5, a, b);
            let coverage = radius + 0.5 - d;
            if coverage > 0.0 {
                blend_pixel(img, x, y, color, coverage);
            }
        }
    }
}

fn corners(a: Point, b: Point) -> [Point; 4] {
    [a, Point::new(b.x, a.y), b, Point::new(a.x, b.y)]
}

pub fn stroke_rect(img: &mut RgbaImage, a: Point, b: Point, color: Rgba<u8>, width: f32) {
    let c = corners(a, b);
    for i in 0..4 {
        draw_segment(img, c[i], c[(i + 1) % 4], color, width);
    }
}

pub fn fill_rect(img: &mut RgbaImage, a: Point, b: Point, color: Rgba<u8>) {
    let x0 = a.x.min(b.x).round().max(0.0) as i64;
    let y0 = a.y.min(b.y).round().max(0.0) as i64;
    let x1 = (a.x.max(b.x).round() as i64).min(img.width() as i64);
    let y1 = (a.y.max(b.y).round() as i64).min(img.height() as i64);
    for y in y0..y1 {
        for x in x0..x1 {
            blend_pixel(img, x, y, color, 1.0);
        }
    }
}

/// Center and radii of the ellipse inscribed in the box spanned by `a` and `b`.
pub fn ellipse_in_box(a: Point, b: Point) -> (Point, f32, f32) {
    let rx = (b.x - a.x).abs() / 2.0;
    let ry = (b.y - a.y).abs() / 2.0;
    (Point::new(a.x.min(b.x) + rx, a.y.min(b.y) + ry), rx, ry)
}

pub fn stroke_ellipse(img: &mut RgbaImage, center: Point, rx: f32, ry: f32, color: Rgba<u8>, width: f32) {
    // Ramanujan's approximation, one segment per ~2px of perimeter.
    let perimeter = std::f32::consts::PI * (3.0 * (rx + ry) - ((3.0 * rx + ry) * (rx + 3.0 * ry)).sqrt());
    let steps = ((perimeter / 2.0).ceil() as usize).clamp(16, 4096);

    let at = |i: usize| {
        let theta = i as f32 / steps as f32 * std::f32::consts::TAU;
        Point::new(center.x + rx * theta.cos(), center.y + ry * theta.sin())
    };
    for i in 0..steps {
        draw_segment(img, at(i), at(i + 1), color, width);
    }
}

pub fn fill_ellipse(img: &mut RgbaImage, center: Point, rx: f32, ry: f32, color: Rgba<u8>) {
    if rx <= 0.0 || ry <= 0.0 {
        return;
    }
    let min_x = (center.x - rx).floor().max(0.0) as i64;
    let min_y = (center.y - ry).floor().max(0.0) as i64;
    let max_x = ((center.x + rx).ceil() as i64).min(img.width() as i64 - 1);
    let max_y = ((center.y + ry).ceil() as i64).min(img.height() as i64 - 1);

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let nx = (x as f32 + 0.5 - center.x) / rx;
            let ny = (y as f32 + 0.5 - center.y) / ry;
            if nx * nx + ny * ny <= 1.0 {
                blend_pixel(img, x, y, color, 1.0);
            }
        }
    }
}

/// 1px dashed rectangle used as the crop marquee.
pub fn dashed_rect(img: &mut RgbaImage, a: Point, b: Point) {
    let c = corners(a, b);
    let (on, off) = CROP_MARQUEE_DASH;
    // The dash pattern carries over from one edge to the next, like a single path.
    let mut phase = 0.0f32;
    for i in 0..4 {
        let (start, end) = (c[i], c[(i + 1) % 4]);
        let length = ((end.x - start.x).powi(2) + (end.y - start.y).powi(2)).sqrt();
        if length == 0.0 {
            continue;
        }
        let (ux, uy) = ((end.x - start.x) / length, (end.y - start.y) / length);
        let mut travelled = 0.0f32;
        while travelled < length {
            let in_dash = phase < on;
            let left_in_phase = if in_dash { on - phase } else { on + off - phase };
            let step = left_in_phase.min(length - travelled);
            if in_dash {
                let from = Point::new(start.x + ux * travelled, start.y + uy * travelled);
                let to = Point::new(from.x + ux * step, from.y + uy * step);
                draw_dash(img, from, to);
            }
            travelled += step;
            phase = (phase + step) % (on + off);
        }
    }
}

/// Hard-edged 1px line, so overlapping dash ends do not double-blend.
fn draw_dash(img: &mut RgbaImage, from: Point, to: Point) {
    let steps = ((to.x - from.x).abs().max((to.y - from.y).abs()).ceil() as usize).max(1);
    let mut last = None;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let x = (from.x + (to.x - from.x) * t).floor() as i64;
        let y = (from.y + (to.y - from.y) * t).floor() as i64;
        if last != Some((x, y)) {
            blend_pixel(img, x, y, CROP_MARQUEE_COLOR, 1.0);
            last = Some((x, y));
        }
    }
}
