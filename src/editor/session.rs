//! Per-editor tool and style state.
//!
//! Every `AnnotationEngine` owns its own session, so the popup editor and the
//! standalone editor never see each other's tool or color.

use image::Rgba;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FONT_SIZE: f32 = 16.0;
pub const DEFAULT_LINE_WIDTH: f32 = 3.0;
pub const DEFAULT_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolKind {
    #[default]
    Draw,
    Crop,
    Text,
    Rectangle,
    #[serde(alias = "circle")]
    Ellipse,
}

impl ToolKind {
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Draw => "draw",
            ToolKind::Crop => "crop",
            ToolKind::Text => "text",
            ToolKind::Rectangle => "rectangle",
            ToolKind::Ellipse => "ellipse",
        }
    }

    pub fn is_shape(&self) -> bool {
        matches!(self, ToolKind::Rectangle | ToolKind::Ellipse)
    }

    /// Whether the color control applies to this tool.
    pub fn uses_color(&self) -> bool {
        !matches!(self, ToolKind::Crop)
    }

    /// Whether the line width control applies to this tool.
    pub fn uses_line_width(&self) -> bool {
        matches!(self, ToolKind::Draw | ToolKind::Rectangle | ToolKind::Ellipse)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    pub color: Rgba<u8>,
    pub line_width: f32,
    pub font_size: f32,
    /// Fill rectangles and ellipses with `color` before stroking.
    pub fill: bool,
    /// Current value of the text input.
    pub text: String,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR,
            line_width: DEFAULT_LINE_WIDTH,
            font_size: DEFAULT_FONT_SIZE,
            fill: false,
            text: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditorSession {
    pub tool: ToolKind,
    pub style: Style,
}

impl EditorSession {
    pub fn new(style: Style) -> Self {
        Self {
            tool: ToolKind::Draw,
            style,
        }
    }
}

/// Parses `#rrggbb` or `#rrggbbaa`.
pub fn parse_hex_color(value: &str) -> Option<Rgba<u8>> {
    let hex = value.trim().strip_prefix('#')?;
    if !hex.is_ascii() || (hex.len() != 6 && hex.len() != 8) {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    let alpha = if hex.len() == 8 { channel(6)? } else { 255 };
    Some(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}
