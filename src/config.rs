//! Configuration module.
//!
//! Handles loading, validating, and layering `cdn-stage.toml`. Every setting
//! can come from three places, later ones winning:
//!
//! ```text
//! stock defaults  →  cdn-stage.toml  →  command-line flags
//! ```
//!
//! The layers are merged as TOML values by [`merge_toml`] and only then
//! deserialized, so a flag overrides exactly one key and leaves the rest of
//! the file intact.
//!
//! ## Configuration Options
//!
//! ```toml
//! [flatten]
//! source = "mta"                 # Root whose subdirectories are flattened
//! dest = "PUBLIC_WEBP"           # Flat destination directory
//! on_error = "continue"          # continue | abort
//!
//! [publish]
//! source = "PUBLIC_WEBP"         # Directory of images to publish
//! dest = "site/station"          # Output directory inside the hosting repo
//! url_base = "https://example.org/cdn/station/"
//! format = "webp"                # webp | avif | jpeg | png
//! quality = 92                   # 0-100
//! manifest = "site/manifest.json"  # Default: <dest parent>/manifest.json
//! recursive = false              # Walk subdirectories of source
//! parse_fields = false           # Split slugs on '_' into station/location/angle
//! collision = "fail"             # fail | suffix | last-wins
//! passthrough = true             # Copy inputs already in the target format
//! lossless = false               # WebP only: lossless encoding, quality ignored
//! method = 6                     # WebP only: encoder effort 0 (fast) - 6 (small)
//!
//! [processing]
//! max_processes = 4              # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! The five publish inputs (`source`, `dest`, `url_base`, `format`,
//! `quality`) have no defaults. A run that gets one of them from neither the
//! file nor a flag fails with [`ConfigError::Missing`] before touching disk.
//!
//! Unknown keys are rejected to catch typos early.

use crate::flatten::OnError;
use crate::imaging::{DEFAULT_WEBP_METHOD, MAX_WEBP_METHOD, OutputFormat};
use crate::slug::CollisionPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File looked up in the working directory when `--config` is not given.
pub const CONFIG_FILENAME: &str = "cdn-stage.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Missing required setting `{key}` (pass {flag} or set it in {CONFIG_FILENAME})")]
    Missing {
        key: &'static str,
        flag: &'static str,
    },
}

/// Full configuration loaded from `cdn-stage.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageConfig {
    /// Flatten stage settings.
    pub flatten: FlattenConfig,
    /// Publish stage settings.
    pub publish: PublishConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

/// Flatten stage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlattenConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<PathBuf>,
    pub on_error: OnError,
}

/// Publish stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    /// Manifest location. Defaults to `manifest.json` beside `dest`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    pub recursive: bool,
    pub parse_fields: bool,
    pub collision: CollisionPolicy,
    pub passthrough: bool,
    /// Encode WebP losslessly.
    pub lossless: bool,
    /// WebP encoder effort, 0-6.
    pub method: u8,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            source: None,
            dest: None,
            url_base: None,
            format: None,
            quality: None,
            manifest: None,
            recursive: false,
            parse_fields: false,
            collision: CollisionPolicy::default(),
            passthrough: true,
            lossless: false,
            method: DEFAULT_WEBP_METHOD,
        }
    }
}

impl FlattenConfig {
    pub fn require_source(&self) -> Result<&Path, ConfigError> {
        required(self.source.as_deref(), "flatten.source", "--source")
    }

    pub fn require_dest(&self) -> Result<&Path, ConfigError> {
        required(self.dest.as_deref(), "flatten.dest", "--dest")
    }
}

impl PublishConfig {
    pub fn require_source(&self) -> Result<&Path, ConfigError> {
        required(self.source.as_deref(), "publish.source", "--source")
    }

    pub fn require_dest(&self) -> Result<&Path, ConfigError> {
        required(self.dest.as_deref(), "publish.dest", "--dest")
    }

    pub fn require_url_base(&self) -> Result<&str, ConfigError> {
        required(self.url_base.as_deref(), "publish.url_base", "--url-base")
    }

    pub fn require_format(&self) -> Result<OutputFormat, ConfigError> {
        required(self.format, "publish.format", "--format")
    }

    pub fn require_quality(&self) -> Result<u32, ConfigError> {
        required(self.quality, "publish.quality", "--quality")
    }
}

fn required<T>(value: Option<T>, key: &'static str, flag: &'static str) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::Missing { key, flag })
}

impl StageConfig {
    /// Validate the values that are present. Absent required values are
    /// reported by the `require_*` accessors, since not every command needs them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(q) = self.publish.quality
            && q > 100
        {
            return Err(ConfigError::Validation(
                "publish.quality must be 0-100".into(),
            ));
        }
        if self.publish.method > MAX_WEBP_METHOD {
            return Err(ConfigError::Validation(format!(
                "publish.method must be 0-{MAX_WEBP_METHOD}"
            )));
        }
        if let Some(base) = &self.publish.url_base
            && !(base.starts_with("https://") || base.starts_with("http://"))
        {
            return Err(ConfigError::Validation(format!(
                "publish.url_base must be an http(s) URL, got '{base}'"
            )));
        }
        if let (Some(s), Some(d)) = (&self.publish.source, &self.publish.dest)
            && s == d
        {
            return Err(ConfigError::Validation(
                "publish.source and publish.dest must differ".into(),
            ));
        }
        if let (Some(s), Some(d)) = (&self.flatten.source, &self.flatten.dest)
            && s == d
        {
            return Err(ConfigError::Validation(
                "flatten.source and flatten.dest must differ".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel conversion workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer that the config file and flags are merged onto.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(StageConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge layers onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    layers: impl IntoIterator<Item = toml::Value>,
) -> Result<StageConfig, ConfigError> {
    let merged = layers.into_iter().fold(base, merge_toml);
    let config: StageConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the effective configuration.
///
/// `explicit` is the `--config` path; it must exist. Without it,
/// [`CONFIG_FILENAME`] in the working directory is used if present.
/// `overrides` (from command-line flags) are applied last.
pub fn load_config(
    explicit: Option<&Path>,
    overrides: Overrides,
) -> Result<StageConfig, ConfigError> {
    let file_layer = match explicit {
        Some(path) => Some(load_raw_config(path)?.ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", path.display()),
            )
        })?),
        None => load_raw_config(Path::new(CONFIG_FILENAME))?,
    };
    let layers = file_layer.into_iter().chain([overrides.into_value()]);
    resolve_config(stock_defaults_value(), layers)
}

/// Sparse `section.key = value` overrides collected from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct Overrides(toml::Table);

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `section.key` when `value` is present.
    pub fn set<V: Into<toml::Value>>(&mut self, section: &str, key: &str, value: Option<V>) {
        let Some(value) = value else {
            return;
        };
        let entry = self
            .0
            .entry(section.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        if let toml::Value::Table(table) = entry {
            table.insert(key.to_string(), value.into());
        }
    }

    /// Set `section.key` to a path, stored as a string.
    pub fn set_path(&mut self, section: &str, key: &str, value: Option<&Path>) {
        self.set(
            section,
            key,
            value.map(|p| p.to_string_lossy().into_owned()),
        );
    }

    pub fn into_value(self) -> toml::Value {
        toml::Value::Table(self.0)
    }
}

/// Returns a fully-commented stock `cdn-stage.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# cdn-stage Configuration
# ========================
# Settings here are overridden by command-line flags.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Flatten: move files from <source>/<subdir>/ into one flat directory
# ---------------------------------------------------------------------------
[flatten]
# source = "mta"
# dest = "PUBLIC_WEBP"

# What to do when a single file fails to move: "continue" or "abort".
on_error = "continue"

# ---------------------------------------------------------------------------
# Publish: convert images and write the URL manifest
# ---------------------------------------------------------------------------
[publish]
# Required (here or as flags): source, dest, url_base, format, quality.
# source = "PUBLIC_WEBP"
# dest = "site/station"
# url_base = "https://example.org/cdn/station/"
# format = "webp"          # webp | avif | jpeg | png
# quality = 92             # 0-100

# Manifest location. Default: manifest.json beside dest.
# manifest = "site/manifest.json"

# Walk subdirectories of source too. Outputs stay flat.
recursive = false

# Split slugs on '_' into station / location / angle.
parse_fields = false

# Two inputs with the same slug: "fail", "suffix" or "last-wins".
collision = "fail"

# Copy inputs that are already in the target format instead of re-encoding.
passthrough = true

# WebP only. Lossless output ignores quality and gives larger files.
lossless = false

# WebP only. Encoder effort from 0 (fastest) to 6 (smallest files).
method = 6

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel conversion workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
