//! CLI output formatting for all pipeline stages.
//!
//! # Information-First Display
//!
//! Output is **asset-centric**. Each line leads with what the user cares
//! about (the published file name, or the file that moved) with paths shown
//! relative to the directory they live in. Full paths only appear in the
//! stage headers.
//!
//! # Output Format
//!
//! ## Flatten
//!
//! ```text
//! Moved 3 files → PUBLIC_WEBP
//!     a/x.png
//!     a/y.png
//!     b/z.png
//! Skipped 1 (already in destination)
//!     b/x.png
//! ```
//!
//! ## Publish
//!
//! ```text
//! Publishing 2 images
//!     001 168th-street.webp: encoded
//!         Source: 168th-street.png
//!     002 (broken.png): failed
//!         Error: Cannot read image: ...
//! Manifest: site/manifest.json (1 entry)
//! Images: 1 encoded, 1 failed (2 total)
//! ```
//!
//! ## Check
//!
//! ```text
//! 001 168th-street.png → station/168th-street.webp
//!     https://example.org/cdn/station/168th-street.webp
//!
//! 1 image would be published
//! ```
//!
//! # Architecture
//!
//! Each stage has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::flatten::FlattenReport;
use crate::manifest::Manifest;
use crate::publish::{OutputStatus, PlannedAsset, PublishEvent, PublishResult};
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// `1 file`, `3 files`.
fn plural(n: usize, one: &str, many: &str) -> String {
    format!("{n} {}", if n == 1 { one } else { many })
}

/// Path relative to `base` when it lives under it, otherwise as given.
fn relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

// ============================================================================
// Stage 1: Flatten output
// ============================================================================

/// Format the result of a flatten run.
pub fn format_flatten_report(
    report: &FlattenReport,
    source_root: &Path,
    dest: &Path,
) -> Vec<String> {
    let mut lines = vec![format!(
        "Moved {} \u{2192} {}",
        plural(report.moved.len(), "file", "files"),
        dest.display()
    )];
    for moved in &report.moved {
        lines.push(format!("    {}", relative(&moved.from, source_root)));
    }

    if !report.skipped.is_empty() {
        lines.push(format!(
            "Skipped {} (already in destination)",
            report.skipped.len()
        ));
        for path in &report.skipped {
            lines.push(format!("    {}", relative(path, source_root)));
        }
    }

    if !report.failures.is_empty() {
        lines.push(format!("Failed {}", report.failures.len()));
        for failure in &report.failures {
            lines.push(format!(
                "    {}: {}",
                relative(&failure.path, source_root),
                failure.error
            ));
        }
    }

    lines
}

/// Print flatten output to stdout.
pub fn print_flatten_report(report: &FlattenReport, source_root: &Path, dest: &Path) {
    for line in format_flatten_report(report, source_root, dest) {
        println!("{}", line);
    }
}

// ============================================================================
// Stage 2: Publish output
// ============================================================================

/// Format a single publish progress event as display lines.
pub fn format_publish_event(event: &PublishEvent) -> Vec<String> {
    match event {
        PublishEvent::Started { total } => {
            vec![format!("Publishing {}", plural(*total, "image", "images"))]
        }
        PublishEvent::AssetPublished {
            index,
            source,
            file_name: output,
            status,
        } => {
            let status_str = match status {
                OutputStatus::Encoded => "encoded",
                OutputStatus::Copied => "copied",
                OutputStatus::Cached => "cached",
            };
            vec![
                format!("    {} {}: {}", format_index(*index), output, status_str),
                format!("        Source: {}", file_name(source)),
            ]
        }
        PublishEvent::AssetFailed {
            index,
            source,
            error,
        } => vec![
            format!("    {} ({}): failed", format_index(*index), file_name(source)),
            format!("        Error: {}", error),
        ],
    }
}

/// Format the closing summary of a publish run.
pub fn format_publish_summary(result: &PublishResult) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Manifest: {} ({})",
            result.manifest_path.display(),
            plural(result.manifest.len(), "entry", "entries")
        ),
        format!("Images: {}", result.stats),
    ];
    if !result.failures.is_empty() {
        lines.push(format!("Skipped {}", plural(result.failures.len(), "input", "inputs")));
        for failure in &result.failures {
            lines.push(format!("    {}", failure));
        }
    }
    lines
}

/// Print publish summary to stdout.
pub fn print_publish_summary(result: &PublishResult) {
    for line in format_publish_summary(result) {
        println!("{}", line);
    }
}

// ============================================================================
// Check (dry run) output
// ============================================================================

/// Format a publish plan alongside the manifest it would produce.
///
/// `assets` and `manifest` must be in the same order, as returned by
/// [`crate::publish::plan`] and [`crate::publish::preview_manifest`].
pub fn format_plan(assets: &[PlannedAsset], manifest: &Manifest) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, (asset, entry)) in assets.iter().zip(&manifest.entries).enumerate() {
        lines.push(format!(
            "{} {} \u{2192} {}",
            format_index(i + 1),
            file_name(&asset.source),
            entry.rel_path
        ));
        lines.push(format!("    {}", entry.url));
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(format!(
        "{} would be published",
        plural(assets.len(), "image", "images")
    ));
    lines
}

/// Print a publish plan to stdout.
pub fn print_plan(assets: &[PlannedAsset], manifest: &Manifest) {
    for line in format_plan(assets, manifest) {
        println!("{}", line);
    }
}
