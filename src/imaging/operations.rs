//! High-level image operations.
//!
//! These functions decide what a source image becomes (output name, convert
//! or copy) and hand the work to a backend.

use super::backend::{BackendError, ImageBackend};
use super::params::{ConvertParams, DEFAULT_WEBP_METHOD, OutputFormat, Quality};
use std::path::Path;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// How an output was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Decoded and re-encoded into the target format.
    Converted,
    /// Source already in the target format; bytes copied.
    Copied,
}

/// Output file name for a slug: `<slug>.<ext>`.
pub fn output_file_name(slug: &str, format: OutputFormat) -> String {
    format!("{}.{}", slug, format.extension())
}

/// True if the source is already in `format` and can be copied as is.
pub fn is_passthrough(source: &Path, format: OutputFormat) -> bool {
    OutputFormat::of_path(source) == Some(format)
}

/// Plan a lossy conversion at the default WebP effort, without executing it.
pub fn plan_conversion(
    source: &Path,
    output_dir: &Path,
    slug: &str,
    format: OutputFormat,
    quality: Quality,
) -> ConvertParams {
    ConvertParams {
        source: source.to_path_buf(),
        output: output_dir.join(output_file_name(slug, format)),
        format,
        quality,
        lossless: false,
        method: DEFAULT_WEBP_METHOD,
    }
}

/// Produce one published image.
///
/// With `passthrough` enabled, a source already in the target format is
/// copied rather than re-encoded.
pub fn publish_image(
    backend: &impl ImageBackend,
    params: &ConvertParams,
    passthrough: bool,
) -> Result<Encoding> {
    if passthrough && is_passthrough(&params.source, params.format) {
        backend.passthrough(&params.source, &params.output)?;
        Ok(Encoding::Copied)
    } else {
        backend.convert(params)?;
        Ok(Encoding::Converted)
    }
}

/// Path of an output relative to the directory above `output_dir`.
///
/// `station/168th-street.webp` for output dir `cdn/station`. Always uses `/`.
pub fn relative_output_path(output_dir: &Path, file_name: &str) -> String {
    match output_dir.file_name() {
        Some(dir) => format!("{}/{}", dir.to_string_lossy(), file_name),
        None => file_name.to_string(),
    }
}
