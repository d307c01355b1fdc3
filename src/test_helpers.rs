//! Shared test utilities for the cdn-stage test suite.
//!
//! Builders for on-disk fixtures (source trees, real images) and small
//! lookups that panic with a readable message instead of returning `Option`.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let root = mta_tree(tmp.path());
//! flatten(&root, &tmp.path().join("PUBLIC_WEBP"), &FlattenOptions::default()).unwrap();
//!
//! assert_eq!(file_names(&tmp.path().join("PUBLIC_WEBP")), ["x.png", "y.png", "z.png"]);
//! ```

use crate::manifest::{Manifest, ManifestEntry};
use std::path::{Path, PathBuf};

// =========================================================================
// Fixture setup
// =========================================================================

/// Write a file, creating parent directories as needed.
pub fn write_file(path: &Path, content: impl AsRef<[u8]>) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Build the canonical generator output under `tmp`:
///
/// ```text
/// mta/a/x.png
/// mta/a/y.png
/// mta/b/z.png
/// ```
///
/// The files hold their own stem as content. Returns the `mta` root.
pub fn mta_tree(tmp: &Path) -> PathBuf {
    let root = tmp.join("mta");
    write_file(&root.join("a/x.png"), "x");
    write_file(&root.join("a/y.png"), "y");
    write_file(&root.join("b/z.png"), "z");
    root
}

/// Write a real RGB PNG with a gradient pattern.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    img.save(path).unwrap();
}

// =========================================================================
// Lookups: panic with a clear message on miss
// =========================================================================

/// Sorted names of the regular files directly inside `dir`.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap_or_else(|e| panic!("cannot list {}: {e}", dir.display()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Find a manifest entry by station. Panics if not found.
pub fn find_entry<'a>(manifest: &'a Manifest, station: &str) -> &'a ManifestEntry {
    manifest.find(station).unwrap_or_else(|| {
        let stations: Vec<&str> = manifest.entries.iter().map(|e| e.station.as_str()).collect();
        panic!("entry '{station}' not found. Available: {stations:?}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn mta_tree_layout() {
        let tmp = TempDir::new().unwrap();
        let root = mta_tree(tmp.path());
        assert_eq!(file_names(&root.join("a")), vec!["x.png", "y.png"]);
        assert_eq!(file_names(&root.join("b")), vec!["z.png"]);
        assert!(file_names(&root).is_empty());
    }

    #[test]
    fn create_test_png_decodes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/img.png");
        create_test_png(&path, 8, 4);
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (8, 4));
    }

    #[test]
    #[should_panic(expected = "entry 'canal' not found")]
    fn find_entry_panics_on_miss() {
        find_entry(&Manifest::default(), "canal");
    }
}
