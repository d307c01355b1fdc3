//! Image backend on top of the `image` crate, with libwebp for WebP output.
//!
//! Everything is statically linked into the binary; `libwebp-sys` builds
//! libwebp from its bundled sources.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, BMP, TIFF, GIF, WebP) | `image::ImageReader` with content sniffing |
//! | Encode → WebP | `webp::Encoder::encode_advanced` (lossy or lossless, effort 0-6) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Encode → PNG | `image::codecs::png::PngEncoder` |
//!
//! Encoded bytes are built in memory and written with
//! [`write_atomic`](crate::fs::write_atomic).

use super::backend::{BackendError, ImageBackend};
use super::params::{ConvertParams, MAX_WEBP_METHOD, OutputFormat};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::path::Path;
use std::sync::LazyLock;

/// Input extensions and the decoder each one needs.
const INPUT_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("bmp", ImageFormat::Bmp),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("gif", ImageFormat::Gif),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    INPUT_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// True if `path` has an extension we can decode (case-insensitive).
pub fn is_supported_input(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            let e = e.to_ascii_lowercase();
            supported_input_extensions().contains(&e.as_str())
        })
}

/// Backend using the `image` crate ecosystem and libwebp.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and decode an image from disk.
///
/// The format is sniffed from the content, so a mislabelled extension still
/// decodes. Any failure here, including a missing file, is a source error.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| BackendError::Decode(format!("{}: {}", path.display(), e)))?
        .decode()
        .map_err(|e| BackendError::Decode(format!("{}: {}", path.display(), e)))
}

/// Reduce to 8-bit RGB, keeping an alpha channel only where the format can store it.
fn to_output_color(img: DynamicImage, format: OutputFormat) -> DynamicImage {
    if format.supports_alpha() && img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}

/// Encode an image into `params.format`, returning the file bytes.
fn encode(img: &DynamicImage, params: &ConvertParams) -> Result<Vec<u8>, BackendError> {
    let q = params.quality.value().clamp(1, 100) as u8;
    let mut buf = Vec::new();
    let result = match params.format {
        OutputFormat::Webp => return encode_webp(img, params),
        OutputFormat::Avif => {
            img.write_with_encoder(AvifEncoder::new_with_speed_quality(&mut buf, 6, q))
        }
        OutputFormat::Jpeg => img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, q)),
        OutputFormat::Png => img.write_with_encoder(PngEncoder::new(&mut buf)),
    };
    result.map_err(|e| BackendError::Encode(format!("{} encode failed: {}", params.format, e)))?;
    Ok(buf)
}

/// Encode WebP through libwebp. `img` must already be RGB8 or RGBA8.
fn encode_webp(img: &DynamicImage, params: &ConvertParams) -> Result<Vec<u8>, BackendError> {
    let encoder = match img {
        DynamicImage::ImageRgba8(rgba) => {
            webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
        }
        DynamicImage::ImageRgb8(rgb) => {
            webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height())
        }
        other => {
            return Err(BackendError::Encode(format!(
                "webp encode failed: unsupported color type {:?}",
                other.color()
            )));
        }
    };

    let mut config = webp::WebPConfig::new()
        .map_err(|_| BackendError::Encode("webp encode failed: bad encoder config".into()))?;
    config.lossless = i32::from(params.lossless);
    config.quality = params.quality.value().clamp(1, 100) as f32;
    config.method = i32::from(params.method.min(MAX_WEBP_METHOD));

    let encoded = encoder
        .encode_advanced(&config)
        .map_err(|e| BackendError::Encode(format!("webp encode failed: {:?}", e)))?;
    Ok(encoded.to_vec())
}

impl ImageBackend for RustBackend {
    fn convert(&self, params: &ConvertParams) -> Result<(), BackendError> {
        let img = to_output_color(load_image(&params.source)?, params.format);
        let bytes = encode(&img, params)?;
        crate::fs::write_atomic(&params.output, &bytes)?;
        Ok(())
    }

    fn passthrough(&self, source: &Path, output: &Path) -> Result<(), BackendError> {
        let bytes = std::fs::read(source)
            .map_err(|e| BackendError::Decode(format!("{}: {}", source.display(), e)))?;
        crate::fs::write_atomic(output, &bytes)?;
        Ok(())
    }
}
