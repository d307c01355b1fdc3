//! Flatten stage: collect generated images into one directory.
//!
//! The upstream generator writes one subdirectory per batch or category:
//!
//! ```text
//! mta/                      # source root
//! ├── a/
//! │   ├── x.png
//! │   └── y.png
//! └── b/
//!     └── z.png
//! ```
//!
//! Flattening moves every regular file found *directly* inside an immediate
//! child of the source root into the destination:
//!
//! ```text
//! PUBLIC_WEBP/
//! ├── x.png
//! ├── y.png
//! └── z.png
//! ```
//!
//! Files sitting in the source root itself, files nested deeper than one
//! level, and anything that is not a regular file are left alone.
//!
//! ## No-clobber
//!
//! A file whose name already exists in the destination is never moved. It
//! stays in its source directory and is reported as skipped. This also
//! resolves same-named files from different subdirectories: the first one in
//! sorted order wins, later ones are skipped.
//!
//! ## Partial failure
//!
//! A failed move (permissions, a locked handle) is recorded in the
//! [`FlattenReport`]. With [`OnError::Continue`] the remaining files are still
//! moved; with [`OnError::Abort`] the run stops at the first failure. Either
//! way an interrupted run is safe to repeat: moved files are gone from the
//! source and no-clobber protects what already landed.

use crate::fs::{EntryKind, FileSystem, LocalFs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum FlattenError {
    #[error("Source root does not exist: {0}")]
    MissingSource(PathBuf),
    #[error("Source root is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("Cannot create destination {path}: {source}")]
    Destination { path: PathBuf, source: io::Error },
    #[error("Cannot list directory {path}: {source}")]
    List { path: PathBuf, source: io::Error },
    #[error("Flatten aborted after {} moved file(s): {failure}", .report.moved.len())]
    Aborted {
        failure: MoveFailure,
        report: Box<FlattenReport>,
    },
}

/// What to do after a single file fails to move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Record the failure and keep going.
    #[default]
    Continue,
    /// Stop at the first failure.
    Abort,
}

#[derive(Debug, Clone, Default)]
pub struct FlattenOptions {
    pub on_error: OnError,
}

/// A file that was moved into the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovedFile {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// A file that could not be moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveFailure {
    pub path: PathBuf,
    pub error: String,
}

impl fmt::Display for MoveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

/// Outcome of a flatten run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenReport {
    pub moved: Vec<MovedFile>,
    /// Source files left in place because the name already exists in the destination.
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<MoveFailure>,
}

impl FlattenReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.moved.len() + self.skipped.len() + self.failures.len()
    }
}

/// Flatten `source_root` into `dest` on the local file system.
pub fn flatten(
    source_root: &Path,
    dest: &Path,
    options: &FlattenOptions,
) -> Result<FlattenReport, FlattenError> {
    flatten_with_fs(&LocalFs, source_root, dest, options)
}

/// Flatten using a specific file system (allows testing in memory).
pub fn flatten_with_fs(
    fs: &impl FileSystem,
    source_root: &Path,
    dest: &Path,
    options: &FlattenOptions,
) -> Result<FlattenReport, FlattenError> {
    if !fs.exists(source_root) {
        return Err(FlattenError::MissingSource(source_root.to_path_buf()));
    }
    if !fs.is_dir(source_root) {
        return Err(FlattenError::NotADirectory(source_root.to_path_buf()));
    }

    fs.create_dir_all(dest)
        .map_err(|source| FlattenError::Destination {
            path: dest.to_path_buf(),
            source,
        })?;

    let children = list(fs, source_root)?;
    let mut report = FlattenReport::default();
    let resolved_dest = fs.resolve(dest);

    for child in children.iter().filter(|e| e.kind == EntryKind::Dir) {
        // The destination may itself sit inside the source root.
        if fs.resolve(&child.path) == resolved_dest {
            continue;
        }

        for file in list(fs, &child.path)? {
            if file.kind != EntryKind::File {
                continue;
            }
            let Some(name) = file.path.file_name() else {
                continue;
            };
            let target = dest.join(name);

            if fs.exists(&target) {
                debug!(source = %file.path.display(), "destination exists, skipping");
                report.skipped.push(file.path);
                continue;
            }

            match fs.move_file(&file.path, &target) {
                Ok(()) => {
                    debug!(from = %file.path.display(), to = %target.display(), "moved");
                    report.moved.push(MovedFile {
                        from: file.path,
                        to: target,
                    });
                }
                Err(e) => {
                    warn!(source = %file.path.display(), error = %e, "move failed");
                    let failure = MoveFailure {
                        path: file.path,
                        error: e.to_string(),
                    };
                    match options.on_error {
                        OnError::Continue => report.failures.push(failure),
                        OnError::Abort => {
                            return Err(FlattenError::Aborted {
                                failure,
                                report: Box::new(report),
                            });
                        }
                    }
                }
            }
        }
    }

    Ok(report)
}

fn list(fs: &impl FileSystem, dir: &Path) -> Result<Vec<crate::fs::Entry>, FlattenError> {
    fs.list_dir(dir).map_err(|source| FlattenError::List {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::memory::MemoryFs;
    use crate::test_helpers::{file_names, mta_tree, write_file};
    use std::fs;
    use tempfile::TempDir;

    // =========================================================================
    // Real file system
    // =========================================================================

    #[test]
    fn flattens_mta_tree() {
        let tmp = TempDir::new().unwrap();
        let root = mta_tree(tmp.path());
        let dest = tmp.path().join("PUBLIC_WEBP");

        let report = flatten(&root, &dest, &FlattenOptions::default()).unwrap();

        assert_eq!(report.moved.len(), 3);
        assert!(report.skipped.is_empty());
        assert!(report.is_clean());
        assert_eq!(file_names(&dest), vec!["x.png", "y.png", "z.png"]);
        assert!(file_names(&root.join("a")).is_empty());
        assert!(file_names(&root.join("b")).is_empty());
    }

    #[test]
    fn destination_created_when_absent() {
        let tmp = TempDir::new().unwrap();
        let root = mta_tree(tmp.path());
        let dest = tmp.path().join("deep/nested/out");

        flatten(&root, &dest, &FlattenOptions::default()).unwrap();
        assert!(dest.is_dir());
    }

    #[test]
    fn second_run_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let root = mta_tree(tmp.path());
        let dest = tmp.path().join("out");

        flatten(&root, &dest, &FlattenOptions::default()).unwrap();
        let second = flatten(&root, &dest, &FlattenOptions::default()).unwrap();

        assert_eq!(second.total(), 0);
        assert!(second.is_clean());
        assert_eq!(file_names(&dest).len(), 3);
    }

    #[test]
    fn existing_destination_file_is_never_overwritten() {
        let tmp = TempDir::new().unwrap();
        let root = mta_tree(tmp.path());
        let dest = tmp.path().join("out");
        write_file(&dest.join("x.png"), "original");

        let report = flatten(&root, &dest, &FlattenOptions::default()).unwrap();

        assert_eq!(fs::read_to_string(dest.join("x.png")).unwrap(), "original");
        assert_eq!(report.skipped, vec![root.join("a/x.png")]);
        assert!(root.join("a/x.png").exists());
        assert_eq!(report.moved.len(), 2);
    }

    #[test]
    fn same_name_in_two_subdirectories_keeps_first() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("src");
        write_file(&root.join("a/dup.png"), "from a");
        write_file(&root.join("b/dup.png"), "from b");
        let dest = tmp.path().join("out");

        let report = flatten(&root, &dest, &FlattenOptions::default()).unwrap();

        assert_eq!(fs::read_to_string(dest.join("dup.png")).unwrap(), "from a");
        assert_eq!(report.skipped, vec![root.join("b/dup.png")]);
    }

    #[test]
    fn root_level_and_deeper_files_are_left_alone() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("src");
        write_file(&root.join("loose.png"), "loose");
        write_file(&root.join("a/keep/deep.png"), "deep");
        write_file(&root.join("a/top.png"), "top");
        let dest = tmp.path().join("out");

        let report = flatten(&root, &dest, &FlattenOptions::default()).unwrap();

        assert_eq!(report.moved.len(), 1);
        assert_eq!(file_names(&dest), vec!["top.png"]);
        assert!(root.join("loose.png").exists());
        assert!(root.join("a/keep/deep.png").exists());
    }

    #[test]
    fn destination_inside_source_root_is_not_rescanned() {
        let tmp = TempDir::new().unwrap();
        let root = mta_tree(tmp.path());
        let dest = root.join("all");
        write_file(&dest.join("already.png"), "a");

        let report = flatten(&root, &dest, &FlattenOptions::default()).unwrap();

        assert_eq!(report.moved.len(), 3);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn destination_inside_source_root_spelled_differently_is_not_rescanned() {
        let tmp = TempDir::new().unwrap();
        let root = mta_tree(tmp.path());
        write_file(&root.join("all/already.png"), "a");
        let dest = root.join("a/../all");

        let report = flatten(&root, &dest, &FlattenOptions::default()).unwrap();

        assert_eq!(report.moved.len(), 3);
        assert!(report.skipped.is_empty());
        assert!(root.join("all/already.png").exists());
    }

    #[test]
    fn relative_destination_with_dot_prefix_in_memory() {
        let mem = MemoryFs::new();
        mem.add_file("mta/a/x.png", b"x");
        mem.add_file("mta/all/old.png", b"old");

        let report = flatten_with_fs(
            &mem,
            Path::new("mta"),
            Path::new("./mta/all"),
            &FlattenOptions::default(),
        )
        .unwrap();

        assert_eq!(report.moved.len(), 1);
        assert!(report.skipped.is_empty());
        assert_eq!(mem.read("mta/all/old.png").unwrap(), b"old");
    }

    #[test]
    fn missing_source_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = flatten(
            &tmp.path().join("nope"),
            &tmp.path().join("out"),
            &FlattenOptions::default(),
        );
        assert!(matches!(result, Err(FlattenError::MissingSource(_))));
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn file_as_source_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("file.png");
        write_file(&file, "x");
        let result = flatten(&file, &tmp.path().join("out"), &FlattenOptions::default());
        assert!(matches!(result, Err(FlattenError::NotADirectory(_))));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_moved() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("src");
        write_file(&root.join("a/real.png"), "r");
        std::os::unix::fs::symlink(root.join("a/real.png"), root.join("a/link.png")).unwrap();
        let dest = tmp.path().join("out");

        let report = flatten(&root, &dest, &FlattenOptions::default()).unwrap();

        assert_eq!(report.moved.len(), 1);
        assert_eq!(file_names(&dest), vec!["real.png"]);
    }

    // =========================================================================
    // In-memory file system
    // =========================================================================

    #[test]
    fn failed_move_is_reported_and_batch_continues() {
        let mem = MemoryFs::new();
        mem.add_file("/src/a/locked.png", b"l");
        mem.add_file("/src/a/ok.png", b"o");
        mem.add_file("/src/b/also.png", b"a");
        mem.fail_moves_from("/src/a/locked.png");

        let report = flatten_with_fs(
            &mem,
            Path::new("/src"),
            Path::new("/out"),
            &FlattenOptions::default(),
        )
        .unwrap();

        assert_eq!(report.moved.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, PathBuf::from("/src/a/locked.png"));
        assert!(report.failures[0].error.contains("permission denied"));
        assert_eq!(mem.file_names("/out"), vec!["also.png", "ok.png"]);
        assert!(mem.read("/src/a/locked.png").is_some());
    }

    #[test]
    fn abort_policy_stops_at_first_failure() {
        let mem = MemoryFs::new();
        mem.add_file("/src/a/1.png", b"1");
        mem.add_file("/src/a/2.png", b"2");
        mem.add_file("/src/a/3.png", b"3");
        mem.fail_moves_from("/src/a/2.png");

        let options = FlattenOptions {
            on_error: OnError::Abort,
        };
        let result = flatten_with_fs(&mem, Path::new("/src"), Path::new("/out"), &options);

        match result {
            Err(FlattenError::Aborted { failure, report }) => {
                assert_eq!(failure.path, PathBuf::from("/src/a/2.png"));
                assert_eq!(report.moved.len(), 1);
            }
            other => panic!("expected Aborted, got {other:?}"),
        }
        assert!(mem.read("/src/a/3.png").is_some());
        assert_eq!(mem.file_names("/out"), vec!["1.png"]);
    }

    #[test]
    fn no_clobber_in_memory_preserves_content() {
        let mem = MemoryFs::new();
        mem.add_file("/src/a/x.png", b"new");
        mem.add_file("/out/x.png", b"old");

        let report = flatten_with_fs(
            &mem,
            Path::new("/src"),
            Path::new("/out"),
            &FlattenOptions::default(),
        )
        .unwrap();

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(mem.read("/out/x.png").unwrap(), b"old");
        assert_eq!(mem.read("/src/a/x.png").unwrap(), b"new");
    }

    #[test]
    fn on_error_parses_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            on_error: OnError,
        }
        let w: Wrapper = toml::from_str(r#"on_error = "abort""#).unwrap();
        assert_eq!(w.on_error, OnError::Abort);
    }
}
