//! Cross-context error taxonomy.
//!
//! Module errors stay local (`thiserror` enums next to the code that raises
//! them). `ErrorKind` is the coarse classification that survives a trip
//! through the handoff store, so a UI surface opened later can still tell a
//! restricted page apart from a failed snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Browser-internal or marketplace page; injection is never attempted.
    RestrictedPage,
    InjectionFailed,
    CaptureFailed,
    /// Crop region exceeds the raster. Never clamped.
    OutOfBounds,
    EncodingFailed,
    EmptyInput,
    /// An area capture is already waiting for a selection.
    Busy,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RestrictedPage => "RestrictedPage",
            ErrorKind::InjectionFailed => "InjectionFailed",
            ErrorKind::CaptureFailed => "CaptureFailed",
            ErrorKind::OutOfBounds => "OutOfBounds",
            ErrorKind::EncodingFailed => "EncodingFailed",
            ErrorKind::EmptyInput => "EmptyInput",
            ErrorKind::Busy => "Busy",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
