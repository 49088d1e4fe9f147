//! Runtime configuration from `SHOTMARK_*` environment variables.
//!
//! A `.env` file in the working directory is loaded first when present.
//! Paths default to the platform directories:
//!   store:     <data_local_dir>/shotmark/handoff.json
//!   downloads: <download_dir>, or the working directory

use ab_glyph::FontArc;
use std::path::PathBuf;

use crate::editor::session::{parse_hex_color, Style};
use crate::editor::text;

pub const STORE_PATH_VAR: &str = "SHOTMARK_STORE_PATH";
pub const DOWNLOAD_DIR_VAR: &str = "SHOTMARK_DOWNLOAD_DIR";
pub const FONT_VAR: &str = "SHOTMARK_FONT";
pub const COLOR_VAR: &str = "SHOTMARK_COLOR";
pub const LINE_WIDTH_VAR: &str = "SHOTMARK_LINE_WIDTH";
pub const FONT_SIZE_VAR: &str = "SHOTMARK_FONT_SIZE";
pub const FILL_VAR: &str = "SHOTMARK_FILL";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub store_path: PathBuf,
    pub download_dir: PathBuf,
    /// Text tool font. `None` when nothing was configured or found.
    pub font_path: Option<PathBuf>,
    /// Starting style of every new editor session.
    pub style: Style,
}

pub fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shotmark")
        .join("handoff.json")
}

pub fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            log::info!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut style = Style::default();
        if let Some(value) = get(COLOR_VAR) {
            style.color = parse_hex_color(&value).ok_or_else(|| ConfigError::invalid(COLOR_VAR, &value))?;
        }
        if let Some(value) = get(LINE_WIDTH_VAR) {
            style.line_width = parse_positive(LINE_WIDTH_VAR, &value)?;
        }
        if let Some(value) = get(FONT_SIZE_VAR) {
            style.font_size = parse_positive(FONT_SIZE_VAR, &value)?;
        }
        if let Some(value) = get(FILL_VAR) {
            style.fill = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::invalid(FILL_VAR, &value)),
            };
        }

        let font_path = match get(FONT_VAR) {
            Some(path) => Some(PathBuf::from(path)),
            None => text::find_system_font(),
        };

        Ok(Self {
            store_path: get(STORE_PATH_VAR).map(PathBuf::from).unwrap_or_else(default_store_path),
            download_dir: get(DOWNLOAD_DIR_VAR).map(PathBuf::from).unwrap_or_else(default_download_dir),
            font_path,
            style,
        })
    }

    /// Loads the text tool font. A missing or broken font only disables the
    /// text tool.
    pub fn load_font(&self) -> Option<FontArc> {
        let path = self.font_path.as_ref()?;
        match text::load_font(path) {
            Ok(font) => Some(font),
            Err(e) => {
                log::warn!("[EDITOR] {}", e);
                None
            }
        }
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<f32, ConfigError> {
    value
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| ConfigError::invalid(var, value))
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
        }
    }
}
