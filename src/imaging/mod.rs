//! Image conversion on top of the `image` and `webp` crates.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` (format sniffed from content) |
//! | **Encode** | `webp` (libwebp) for WebP; `image` codecs for AVIF (rav1e), JPEG, PNG |
//! | **Passthrough** | byte copy when the source is already in the target format |
//!
//! The module is split into:
//! - **Parameters**: [`OutputFormat`], [`Quality`], [`ConvertParams`]
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: output naming and convert-or-copy decisions

pub mod backend;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend};
pub use operations::{
    Encoding, output_file_name, plan_conversion, publish_image, relative_output_path,
};
pub use params::{ConvertParams, DEFAULT_WEBP_METHOD, MAX_WEBP_METHOD, OutputFormat, Quality};
pub use rust_backend::{RustBackend, is_supported_input, supported_input_extensions};
