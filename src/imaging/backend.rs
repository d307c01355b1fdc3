//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the publisher needs:
//! convert (decode + re-encode) and passthrough copy.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate codecs and libwebp through the `webp` crate.
//!
//! Errors are split by *where* they happened, because the publisher treats
//! them differently: a [`BackendError::Decode`] is the source's fault and only
//! fails that one asset, anything else means the destination could not be
//! written and stops the run.

use super::params::ConvertParams;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot read image: {0}")]
    Decode(String),
    #[error("Encoding failed: {0}")]
    Encode(String),
}

impl BackendError {
    /// True when the failure is confined to the source image.
    pub fn is_source_error(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Trait for image processing backends.
pub trait ImageBackend: Sync {
    /// Decode `params.source` and write it to `params.output` in the target format.
    fn convert(&self, params: &ConvertParams) -> Result<(), BackendError>;

    /// Copy an input that is already in the target format, byte for byte.
    fn passthrough(&self, source: &Path, output: &Path) -> Result<(), BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Mock backend that records operations and writes a marker file per output.
    /// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
    #[derive(Default)]
    pub struct MockBackend {
        pub operations: Mutex<Vec<RecordedOp>>,
        /// Sources that fail to decode.
        pub corrupt: Mutex<HashSet<PathBuf>>,
        /// Simulate a full or read-only destination.
        pub fail_writes: bool,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Convert {
            source: String,
            output: String,
            format: String,
            quality: u32,
            lossless: bool,
            method: u8,
        },
        Passthrough {
            source: String,
            output: String,
        },
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_corrupt(paths: &[PathBuf]) -> Self {
            Self {
                corrupt: Mutex::new(paths.iter().cloned().collect()),
                ..Self::default()
            }
        }

        pub fn failing_writes() -> Self {
            Self {
                fail_writes: true,
                ..Self::default()
            }
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        fn write_marker(&self, output: &Path, marker: &str) -> Result<(), BackendError> {
            if self.fail_writes {
                return Err(BackendError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only destination",
                )));
            }
            std::fs::write(output, marker)?;
            Ok(())
        }
    }

    impl ImageBackend for MockBackend {
        fn convert(&self, params: &ConvertParams) -> Result<(), BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Convert {
                source: params.source.to_string_lossy().to_string(),
                output: params.output.to_string_lossy().to_string(),
                format: params.format.to_string(),
                quality: params.quality.value(),
                lossless: params.lossless,
                method: params.method,
            });
            if self.corrupt.lock().unwrap().contains(&params.source) {
                return Err(BackendError::Decode(format!(
                    "{}: corrupt",
                    params.source.display()
                )));
            }
            self.write_marker(&params.output, &format!("mock {}", params.format))
        }

        fn passthrough(&self, source: &Path, output: &Path) -> Result<(), BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Passthrough {
                source: source.to_string_lossy().to_string(),
                output: output.to_string_lossy().to_string(),
            });
            self.write_marker(output, "mock copy")
        }
    }

    #[test]
    fn mock_records_convert() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = MockBackend::new();
        let output = tmp.path().join("out.webp");

        backend
            .convert(&ConvertParams {
                source: "/source.png".into(),
                output: output.clone(),
                format: crate::imaging::OutputFormat::Webp,
                quality: crate::imaging::Quality::new(92),
                lossless: false,
                method: 4,
            })
            .unwrap();

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 1);
        assert!(matches!(
            &ops[0],
            RecordedOp::Convert { quality: 92, method: 4, lossless: false, format, .. }
                if format == "webp"
        ));
        assert!(output.exists());
    }

    #[test]
    fn mock_corrupt_source_is_decode_error() {
        let backend = MockBackend::with_corrupt(&[PathBuf::from("/bad.png")]);
        let err = backend
            .convert(&ConvertParams {
                source: "/bad.png".into(),
                output: "/unused.webp".into(),
                format: crate::imaging::OutputFormat::Webp,
                quality: crate::imaging::Quality::default(),
                lossless: false,
                method: crate::imaging::DEFAULT_WEBP_METHOD,
            })
            .unwrap_err();
        assert!(err.is_source_error());
    }

    #[test]
    fn io_error_is_not_a_source_error() {
        let err = BackendError::Io(std::io::Error::other("disk full"));
        assert!(!err.is_source_error());
        assert!(!BackendError::Encode("x".into()).is_source_error());
    }
}
