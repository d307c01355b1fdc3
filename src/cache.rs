//! Publish cache for incremental re-runs.
//!
//! Re-running `publish` over an unchanged source set must reproduce the same
//! manifest, and should not spend minutes re-encoding images that have not
//! changed. This module records, per output file, what it was produced from.
//!
//! ## Cache keys
//!
//! - **`source_hash`**: SHA-256 of the source file contents. Content-based
//!   rather than mtime-based so it survives `git checkout` and the moves done
//!   by the flatten stage, both of which touch modification times.
//! - **`params_hash`**: SHA-256 of the encoding parameters (format, quality,
//!   WebP lossless and method, passthrough). Changing any of them re-encodes
//!   the output.
//!
//! A cache hit requires:
//! 1. An entry for the output file name with matching `source_hash` and
//!    `params_hash`
//! 2. The output file still exists in the destination
//!
//! ## Storage
//!
//! The cache is a JSON file at `<dest>/.publish-cache.json`, next to the
//! images it describes. Entries are keyed by output file name in a
//! `BTreeMap`, so the file itself is stable across runs.
//!
//! `--no-cache` loads an empty cache, so every image is re-encoded and the
//! old outputs are overwritten.

use crate::imaging::OutputFormat;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the cache file within the destination directory.
const CACHE_FILENAME: &str = ".publish-cache.json";

/// Version of the cache file format. Bump this to invalidate all
/// existing caches when the format or key computation changes.
const CACHE_VERSION: u32 = 1;

/// What a single output file was produced from.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub source_hash: String,
    pub params_hash: String,
}

/// On-disk cache mapping output file names to their cache entries.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PublishCache {
    pub version: u32,
    pub entries: BTreeMap<String, CacheEntry>,
}

impl PublishCache {
    /// Create an empty cache (used for `--no-cache` or a first publish).
    pub fn empty() -> Self {
        Self {
            version: CACHE_VERSION,
            entries: BTreeMap::new(),
        }
    }

    /// Load from the destination directory. Returns an empty cache if the
    /// file doesn't exist or can't be parsed (version mismatch, corruption).
    pub fn load(dest: &Path) -> Self {
        let content = match std::fs::read_to_string(cache_path(dest)) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(cache) if cache.version == CACHE_VERSION => cache,
            _ => Self::empty(),
        }
    }

    /// Save to the destination directory.
    pub fn save(&self, dest: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        crate::fs::write_atomic(&cache_path(dest), json.as_bytes())
    }

    /// True if `file_name` in `dest` was produced from exactly these inputs
    /// and is still on disk.
    pub fn is_fresh(
        &self,
        file_name: &str,
        source_hash: &str,
        params_hash: &str,
        dest: &Path,
    ) -> bool {
        self.entries.get(file_name).is_some_and(|entry| {
            entry.source_hash == source_hash && entry.params_hash == params_hash
        }) && dest.join(file_name).exists()
    }

    /// Record what an output file was produced from.
    pub fn insert(&mut self, file_name: String, source_hash: String, params_hash: String) {
        self.entries.insert(
            file_name,
            CacheEntry {
                source_hash,
                params_hash,
            },
        );
    }

    /// Drop an entry whose output could not be (re)produced.
    pub fn remove(&mut self, file_name: &str) {
        self.entries.remove(file_name);
    }
}

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{:x}", digest))
}

/// SHA-256 hash of the parameters an output is encoded with.
pub fn hash_publish_params(
    format: OutputFormat,
    quality: u32,
    lossless: bool,
    method: u8,
    passthrough: bool,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"publish\0");
    hasher.update(format.extension().as_bytes());
    hasher.update(b"\0");
    hasher.update(quality.to_le_bytes());
    hasher.update([u8::from(lossless), method, u8::from(passthrough)]);
    format!("{:x}", hasher.finalize())
}

/// Resolve the cache file path for a destination directory.
pub fn cache_path(dest: &Path) -> PathBuf {
    dest.join(CACHE_FILENAME)
}
