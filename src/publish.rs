//! Image publishing.
//!
//! Stage 2 of the pipeline. Takes a flat directory of images, converts each
//! one to the chosen output format under a slug-based name, and writes a JSON
//! manifest mapping every asset to its public URL.
//!
//! ## Input
//!
//! Regular files directly inside the source directory (or anywhere below it
//! with `recursive`) whose extension is a supported input format:
//! jpg, jpeg, png, bmp, tif, tiff, gif, webp. Everything else is ignored.
//! Files are taken in byte-wise file name order, which is also manifest order.
//!
//! ## Output Structure
//!
//! ```text
//! site/
//! ├── manifest.json                 # Default manifest location
//! └── station/                      # Destination directory
//!     ├── .publish-cache.json       # Incremental re-run cache
//!     ├── 168th-street.webp
//!     └── times-square.webp
//! ```
//!
//! ## Failure handling
//!
//! - An input that cannot be decoded is skipped and reported; the rest of
//!   the run continues and the manifest lists only what was written.
//! - A destination that cannot be written stops the run with
//!   [`PublishError::DestinationWrite`].
//! - Under [`CollisionPolicy::Fail`] a slug collision is reported before
//!   anything is written.
//!
//! ## Parallel Processing
//!
//! Assets are converted in parallel using [rayon](https://docs.rs/rayon).
//! Results are collected back in plan order, so worker scheduling never
//! changes the manifest.

use crate::cache::{self, PublishCache};
use crate::config::{ConfigError, PublishConfig};
use crate::fs::resolve_path;
use crate::imaging::{
    BackendError, ConvertParams, DEFAULT_WEBP_METHOD, Encoding, ImageBackend, OutputFormat,
    Quality, RustBackend, is_supported_input, output_file_name, plan_conversion, publish_image,
    relative_output_path,
};
use crate::manifest::{Manifest, ManifestEntry, default_manifest_path, public_url};
use crate::slug::{CollisionPolicy, derive_slug, name_fields, resolve_slugs};
use rayon::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Source directory does not exist: {0}")]
    MissingSource(PathBuf),
    #[error("Source is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("Cannot read source directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Slug '{slug}' is derived by both {first} and {second}")]
    SlugCollision {
        slug: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("Cannot write {path}: {source}")]
    DestinationWrite {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn destination_error(path: &Path, source: std::io::Error) -> PublishError {
    PublishError::DestinationWrite {
        path: path.to_path_buf(),
        source,
    }
}

/// Settings for one publish run.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub url_base: String,
    pub format: OutputFormat,
    pub quality: u32,
    /// Manifest location. `None` means `manifest.json` beside the destination.
    pub manifest_path: Option<PathBuf>,
    pub recursive: bool,
    pub parse_fields: bool,
    pub collision: CollisionPolicy,
    pub passthrough: bool,
    /// Encode WebP losslessly.
    pub lossless: bool,
    /// WebP encoder effort, 0-6.
    pub method: u8,
    /// Reuse outputs recorded in the destination's publish cache.
    pub use_cache: bool,
}

impl PublishOptions {
    /// Options with every optional behavior at its default.
    pub fn new(url_base: impl Into<String>, format: OutputFormat, quality: u32) -> Self {
        Self {
            url_base: url_base.into(),
            format,
            quality,
            manifest_path: None,
            recursive: false,
            parse_fields: false,
            collision: CollisionPolicy::default(),
            passthrough: true,
            lossless: false,
            method: DEFAULT_WEBP_METHOD,
            use_cache: true,
        }
    }

    /// Manifest path this run writes to.
    pub fn manifest_path_for(&self, dest: &Path) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| default_manifest_path(dest))
    }
}

/// A fully specified publish run: where from, where to, and how.
#[derive(Debug, Clone)]
pub struct PublishJob {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub options: PublishOptions,
}

impl PublishJob {
    /// Build a job from the `[publish]` config section.
    ///
    /// Fails with [`ConfigError::Missing`] naming the first absent required setting.
    pub fn from_config(config: &PublishConfig) -> Result<Self, ConfigError> {
        let source = config.require_source()?.to_path_buf();
        Self::from_config_with_source(config, source)
    }

    /// Like [`from_config`](Self::from_config), with the source supplied by the
    /// caller (the pipeline publishes whatever the flatten stage produced).
    pub fn from_config_with_source(
        config: &PublishConfig,
        source: PathBuf,
    ) -> Result<Self, ConfigError> {
        let dest = config.require_dest()?.to_path_buf();
        let options = PublishOptions {
            manifest_path: config.manifest.clone(),
            recursive: config.recursive,
            parse_fields: config.parse_fields,
            collision: config.collision,
            passthrough: config.passthrough,
            lossless: config.lossless,
            method: config.method,
            ..PublishOptions::new(
                config.require_url_base()?,
                config.require_format()?,
                config.require_quality()?,
            )
        };
        Ok(Self {
            source,
            dest,
            options,
        })
    }
}

/// One asset scheduled for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAsset {
    pub source: PathBuf,
    /// Source file stem, case preserved.
    pub file_stem: String,
    pub slug: String,
    /// Output file name within the destination.
    pub file_name: String,
}

/// How a published asset's output came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    /// Decoded and re-encoded.
    Encoded,
    /// Source already in the target format; bytes copied.
    Copied,
    /// Output from a previous run is still current.
    Cached,
}

/// Progress events emitted while publishing.
///
/// Events from parallel workers arrive in completion order. `index` is the
/// asset's 1-based position in the plan.
#[derive(Debug, Clone)]
pub enum PublishEvent {
    Started {
        total: usize,
    },
    AssetPublished {
        index: usize,
        source: PathBuf,
        file_name: String,
        status: OutputStatus,
    },
    AssetFailed {
        index: usize,
        source: PathBuf,
        error: String,
    },
}

/// An input that was skipped because it could not be read or decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub source: PathBuf,
    pub error: String,
}

impl fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source.display(), self.error)
    }
}

/// Counts of what a publish run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub encoded: usize,
    pub copied: usize,
    pub cached: usize,
    pub failed: usize,
}

impl PublishStats {
    pub fn total(&self) -> usize {
        self.encoded + self.copied + self.cached + self.failed
    }

    fn record(&mut self, status: OutputStatus) {
        match status {
            OutputStatus::Encoded => self.encoded += 1,
            OutputStatus::Copied => self.copied += 1,
            OutputStatus::Cached => self.cached += 1,
        }
    }
}

impl fmt::Display for PublishStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = [
            (self.encoded, "encoded"),
            (self.copied, "copied"),
            (self.cached, "cached"),
            (self.failed, "failed"),
        ]
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, label)| format!("{n} {label}"))
        .collect();

        if parts.is_empty() {
            write!(f, "nothing to publish")
        } else {
            write!(f, "{} ({} total)", parts.join(", "), self.total())
        }
    }
}

/// Everything a finished publish run produced.
#[derive(Debug)]
pub struct PublishResult {
    pub manifest: Manifest,
    pub manifest_path: PathBuf,
    pub stats: PublishStats,
    pub failures: Vec<EntryFailure>,
}

impl PublishResult {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// List the publishable inputs under `source`, in file name order.
///
/// `dest` is excluded from the walk so a destination nested inside the
/// source is never read back as input.
pub fn collect_inputs(
    source: &Path,
    dest: &Path,
    recursive: bool,
) -> Result<Vec<PathBuf>, PublishError> {
    if !source.exists() {
        return Err(PublishError::MissingSource(source.to_path_buf()));
    }
    if !source.is_dir() {
        return Err(PublishError::NotADirectory(source.to_path_buf()));
    }

    let dest = resolve_path(dest);
    let walker = WalkDir::new(source)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && resolve_path(e.path()) == dest));

    let mut inputs = Vec::new();
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() && is_supported_input(entry.path()) {
            inputs.push(entry.into_path());
        } else {
            debug!(path = %entry.path().display(), "not a publishable input");
        }
    }
    Ok(inputs)
}

/// Work out what a publish run would produce, without writing anything.
pub fn plan(
    source: &Path,
    dest: &Path,
    options: &PublishOptions,
) -> Result<Vec<PlannedAsset>, PublishError> {
    let inputs = collect_inputs(source, dest, options.recursive)?;

    let stems: Vec<String> = inputs
        .iter()
        .map(|p| {
            p.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect();
    let slugs: Vec<String> = stems.iter().map(|s| derive_slug(s)).collect();

    let resolved =
        resolve_slugs(&slugs, options.collision).map_err(|c| PublishError::SlugCollision {
            slug: c.slug,
            first: inputs[c.first].clone(),
            second: inputs[c.second].clone(),
        })?;

    Ok(resolved
        .into_iter()
        .map(|(i, slug)| PlannedAsset {
            source: inputs[i].clone(),
            file_stem: stems[i].clone(),
            file_name: output_file_name(&slug, options.format),
            slug,
        })
        .collect())
}

/// Manifest entry for a planned asset.
pub fn manifest_entry(
    asset: &PlannedAsset,
    dest: &Path,
    options: &PublishOptions,
) -> ManifestEntry {
    let fields = name_fields(&asset.slug, options.parse_fields);
    ManifestEntry {
        file_stem: asset.file_stem.clone(),
        station: fields.station,
        location: fields.location,
        angle: fields.angle,
        rel_path: relative_output_path(dest, &asset.file_name),
        url: public_url(&options.url_base, &asset.file_name),
    }
}

/// The manifest a clean run of `assets` would write.
pub fn preview_manifest(
    assets: &[PlannedAsset],
    dest: &Path,
    options: &PublishOptions,
) -> Manifest {
    Manifest {
        entries: assets
            .iter()
            .map(|a| manifest_entry(a, dest, options))
            .collect(),
    }
}

pub fn publish(
    source: &Path,
    dest: &Path,
    options: &PublishOptions,
    events: Option<Sender<PublishEvent>>,
) -> Result<PublishResult, PublishError> {
    let backend = RustBackend::new();
    publish_with_backend(&backend, source, dest, options, events)
}

/// Publish using a specific backend (allows testing with mock).
pub fn publish_with_backend(
    backend: &impl ImageBackend,
    source: &Path,
    dest: &Path,
    options: &PublishOptions,
    events: Option<Sender<PublishEvent>>,
) -> Result<PublishResult, PublishError> {
    let assets = plan(source, dest, options)?;
    info!(
        source = %source.display(),
        dest = %dest.display(),
        assets = assets.len(),
        "publishing"
    );

    std::fs::create_dir_all(dest).map_err(|e| destination_error(dest, e))?;

    let mut publish_cache = if options.use_cache {
        PublishCache::load(dest)
    } else {
        PublishCache::empty()
    };
    let params_hash = cache::hash_publish_params(
        options.format,
        options.quality,
        options.lossless,
        options.method,
        options.passthrough,
    );

    if let Some(tx) = &events {
        tx.send(PublishEvent::Started {
            total: assets.len(),
        })
        .ok();
    }

    let outcomes: Vec<Outcome> = assets
        .par_iter()
        .enumerate()
        .map(|(i, asset)| {
            let outcome = publish_one(backend, asset, dest, options, &publish_cache, &params_hash);
            if let (Some(tx), Ok(outcome)) = (&events, &outcome) {
                tx.send(outcome.event(i + 1, asset)).ok();
            }
            outcome
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut stats = PublishStats::default();
    let mut failures = Vec::new();
    let mut manifest = Manifest::default();

    for (asset, outcome) in assets.iter().zip(outcomes) {
        match outcome {
            Outcome::Published {
                status,
                source_hash,
            } => {
                stats.record(status);
                publish_cache.insert(asset.file_name.clone(), source_hash, params_hash.clone());
                manifest.entries.push(manifest_entry(asset, dest, options));
            }
            Outcome::Failed(failure) => {
                warn!(source = %failure.source.display(), error = %failure.error, "skipping input");
                stats.failed += 1;
                publish_cache.remove(&asset.file_name);
                failures.push(failure);
            }
        }
    }

    publish_cache
        .save(dest)
        .map_err(|e| destination_error(&cache::cache_path(dest), e))?;

    let manifest_path = options.manifest_path_for(dest);
    if let Some(parent) = manifest_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| destination_error(parent, e))?;
    }
    manifest
        .write(&manifest_path)
        .map_err(|e| destination_error(&manifest_path, e))?;
    info!(manifest = %manifest_path.display(), %stats, "publish finished");

    Ok(PublishResult {
        manifest,
        manifest_path,
        stats,
        failures,
    })
}

/// Per-asset result. Fatal destination errors travel separately as `Err`.
enum Outcome {
    Published {
        status: OutputStatus,
        source_hash: String,
    },
    Failed(EntryFailure),
}

impl Outcome {
    fn event(&self, index: usize, asset: &PlannedAsset) -> PublishEvent {
        match self {
            Outcome::Published { status, .. } => PublishEvent::AssetPublished {
                index,
                source: asset.source.clone(),
                file_name: asset.file_name.clone(),
                status: *status,
            },
            Outcome::Failed(failure) => PublishEvent::AssetFailed {
                index,
                source: failure.source.clone(),
                error: failure.error.clone(),
            },
        }
    }
}

fn publish_one(
    backend: &impl ImageBackend,
    asset: &PlannedAsset,
    dest: &Path,
    options: &PublishOptions,
    publish_cache: &PublishCache,
    params_hash: &str,
) -> Result<Outcome, PublishError> {
    let failed = |error: String| {
        Outcome::Failed(EntryFailure {
            source: asset.source.clone(),
            error,
        })
    };

    let source_hash = match cache::hash_file(&asset.source) {
        Ok(hash) => hash,
        Err(e) => return Ok(failed(e.to_string())),
    };

    if publish_cache.is_fresh(&asset.file_name, &source_hash, params_hash, dest) {
        debug!(file = %asset.file_name, "cached");
        return Ok(Outcome::Published {
            status: OutputStatus::Cached,
            source_hash,
        });
    }

    let params = ConvertParams {
        lossless: options.lossless,
        method: options.method,
        ..plan_conversion(
            &asset.source,
            dest,
            &asset.slug,
            options.format,
            Quality::new(options.quality),
        )
    };

    match publish_image(backend, &params, options.passthrough) {
        Ok(encoding) => {
            let status = match encoding {
                Encoding::Converted => OutputStatus::Encoded,
                Encoding::Copied => OutputStatus::Copied,
            };
            debug!(file = %asset.file_name, ?status, "published");
            Ok(Outcome::Published {
                status,
                source_hash,
            })
        }
        Err(e) if e.is_source_error() => Ok(failed(e.to_string())),
        Err(BackendError::Io(e)) => Err(destination_error(&params.output, e)),
        Err(e) => Err(destination_error(
            &params.output,
            std::io::Error::other(e.to_string()),
        )),
    }
}
