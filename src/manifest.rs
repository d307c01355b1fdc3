//! The published manifest: one entry per asset, mapping slugs to public URLs.
//!
//! Serialized as a pretty-printed JSON array. Field order is fixed by the
//! struct definition and entry order is the publish plan order, so the same
//! inputs always produce the same bytes:
//!
//! ```json
//! [
//!   {
//!     "file_stem": "168th-street",
//!     "station": "168th-street",
//!     "location": "",
//!     "angle": "",
//!     "rel_path": "station/168th-street.webp",
//!     "url": "https://example.org/cdn/station/168th-street.webp"
//!   }
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Default manifest file name, written next to the destination directory.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// One published asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Source file stem, case preserved.
    pub file_stem: String,
    pub station: String,
    pub location: String,
    pub angle: String,
    /// Output path relative to the hosting root, `/`-separated.
    pub rel_path: String,
    pub url: String,
}

/// Ordered collection of published assets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by its `station` field.
    pub fn find(&self, station: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.station == station)
    }

    /// Serialized form, with a trailing newline.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json()?;
        crate::fs::write_atomic(path, json.as_bytes())
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Public URL for a published file: `<url_base>/<file_name>` with exactly one `/`.
pub fn public_url(url_base: &str, file_name: &str) -> String {
    format!("{}/{}", url_base.trim_end_matches('/'), file_name)
}

/// Where the manifest goes when no path is configured: beside the destination.
pub fn default_manifest_path(dest: &Path) -> PathBuf {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(MANIFEST_FILENAME),
        _ => PathBuf::from(MANIFEST_FILENAME),
    }
}
