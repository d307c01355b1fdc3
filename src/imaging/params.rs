//! Parameter types for image operations.
//!
//! These structs describe *what* to produce, not *how*. They are the interface
//! between [`operations`](super::operations), which decides what each asset
//! becomes, and the [`backend`](super::backend), which does the pixel work.
//!
//! - [`Quality`]: lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`OutputFormat`]: the web format assets are published in.
//! - [`ConvertParams`]: full specification for one conversion.
//!
//! `lossless` and `method` only affect WebP output. `method` is libwebp's
//! effort setting, 0 (fast) to 6 (smallest files).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Default WebP encoding effort.
pub const DEFAULT_WEBP_METHOD: u8 = 6;

/// Highest WebP encoding effort libwebp accepts.
pub const MAX_WEBP_METHOD: u8 = 6;

/// Target format for published images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Webp,
    Avif,
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
}

impl OutputFormat {
    /// File extension written for this format (no dot).
    pub fn extension(self) -> &'static str {
        match self {
            Self::Webp => "webp",
            Self::Avif => "avif",
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    /// Map a file extension to the format it already is, if it is one we publish.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "webp" => Some(Self::Webp),
            "avif" => Some(Self::Avif),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    /// Format of the file at `path`, judged by extension.
    pub fn of_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn supports_alpha(self) -> bool {
        !matches!(self, Self::Jpeg)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Webp => "webp",
            Self::Avif => "avif",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s)
            .ok_or_else(|| format!("unknown format '{s}' (expected webp, avif, jpeg or png)"))
    }
}

/// Parameters for converting one source image into a published output.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub quality: Quality,
    /// Encode WebP losslessly; `quality` is then ignored by the encoder.
    pub lossless: bool,
    /// WebP encoding effort, 0..=6.
    pub method: u8,
}
