//! File system seam for the flatten stage.
//!
//! The flattener never calls `std::fs` directly. Every query it makes about
//! the source tree or the destination ("does this name already exist?") goes
//! through [`FileSystem`], so the no-clobber logic can be exercised against
//! the in-memory implementation in tests.
//!
//! [`LocalFs`] is the production implementation.
//!
//! [`write_atomic`] is shared by everything that writes published files
//! (images, the manifest, the publish cache). [`move_by_copy`] gives the
//! cross-device move the same guarantee: the target name only ever holds a
//! complete file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// What kind of thing a directory entry is. Symlinks are reported as
/// [`EntryKind::Other`] and never followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

/// A single directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

impl Entry {
    /// Final path component as a display string.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Operations the flattener needs from a file system.
pub trait FileSystem {
    /// True if `path` exists and is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// True if anything (file, directory, dangling symlink) occupies `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Immediate children of `dir`, sorted by path.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<Entry>>;

    /// Create a directory and all missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Move a regular file. The source no longer exists afterwards.
    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Canonical spelling of `path`, for comparing locations written
    /// differently (`./mta/all` and `mta/all`). Unresolvable paths come back
    /// unchanged.
    fn resolve(&self, path: &Path) -> PathBuf;
}

/// The real file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let kind = if file_type.is_file() {
                EntryKind::File
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::Other
            };
            entries.push(Entry {
                path: entry.path(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            // rename(2) cannot cross mount points
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => move_by_copy(from, to),
            Err(e) => Err(e),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        resolve_path(path)
    }
}

/// Canonicalize `path`, falling back to the path as given when it does not exist.
pub fn resolve_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Directory a temp file for `path` should live in, so that persisting it is a rename.
fn sibling_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Move a file by copying it into a temp file beside `to`, then removing `from`.
///
/// The copy only takes the name `to` once it is complete, and never replaces
/// an existing file. On any failure `from` is untouched and `to` is not created.
pub fn move_by_copy(from: &Path, to: &Path) -> io::Result<()> {
    let mut source = fs::File::open(from)?;
    let mut tmp = tempfile::NamedTempFile::new_in(sibling_dir(to))?;
    io::copy(&mut source, &mut tmp)?;
    tmp.as_file().set_permissions(source.metadata()?.permissions())?;
    tmp.persist_noclobber(to).map_err(|e| e.error)?;
    fs::remove_file(from)
}

/// Write `bytes` to `path` through a temporary file in the same directory.
///
/// Readers see either the old file or the complete new one, never a
/// truncated write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(sibling_dir(path))?;
    io::Write::write_all(&mut tmp, bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet, HashSet};
    use std::path::Component;
    use std::sync::Mutex;

    /// In-memory file system for flatten tests.
    ///
    /// Paths registered through [`MemoryFs::fail_moves_from`] make
    /// `move_file` return `PermissionDenied`, which is how tests simulate a
    /// locked or read-only source file.
    #[derive(Default)]
    pub struct MemoryFs {
        pub files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
        pub dirs: Mutex<BTreeSet<PathBuf>>,
        pub failing: Mutex<HashSet<PathBuf>>,
    }

    impl MemoryFs {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_dir(&self, path: impl AsRef<Path>) {
            let mut dirs = self.dirs.lock().unwrap();
            for ancestor in path.as_ref().ancestors() {
                if ancestor.as_os_str().is_empty() {
                    break;
                }
                dirs.insert(ancestor.to_path_buf());
            }
        }

        pub fn add_file(&self, path: impl AsRef<Path>, content: &[u8]) {
            let path = path.as_ref();
            if let Some(parent) = path.parent() {
                self.add_dir(parent);
            }
            self.files
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), content.to_vec());
        }

        pub fn fail_moves_from(&self, path: impl AsRef<Path>) {
            self.failing
                .lock()
                .unwrap()
                .insert(path.as_ref().to_path_buf());
        }

        pub fn read(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
            self.files.lock().unwrap().get(path.as_ref()).cloned()
        }

        /// Names of the files directly inside `dir`, sorted.
        pub fn file_names(&self, dir: impl AsRef<Path>) -> Vec<String> {
            let dir = dir.as_ref();
            self.files
                .lock()
                .unwrap()
                .keys()
                .filter(|p| p.parent() == Some(dir))
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        }
    }

    impl FileSystem for MemoryFs {
        fn is_dir(&self, path: &Path) -> bool {
            self.dirs.lock().unwrap().contains(path)
        }

        fn exists(&self, path: &Path) -> bool {
            self.is_dir(path) || self.files.lock().unwrap().contains_key(path)
        }

        fn list_dir(&self, dir: &Path) -> io::Result<Vec<Entry>> {
            if !self.is_dir(dir) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such directory"));
            }
            let mut entries: Vec<Entry> = self
                .dirs
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.parent() == Some(dir))
                .map(|p| Entry {
                    path: p.clone(),
                    kind: EntryKind::Dir,
                })
                .collect();
            entries.extend(
                self.files
                    .lock()
                    .unwrap()
                    .keys()
                    .filter(|p| p.parent() == Some(dir))
                    .map(|p| Entry {
                        path: p.clone(),
                        kind: EntryKind::File,
                    }),
            );
            entries.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(entries)
        }

        fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            self.add_dir(path);
            Ok(())
        }

        fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
            if self.failing.lock().unwrap().contains(from) {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "permission denied",
                ));
            }
            let mut files = self.files.lock().unwrap();
            let content = files
                .remove(from)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
            files.insert(to.to_path_buf(), content);
            Ok(())
        }

        /// Lexical only: drops `.` and folds `..`.
        fn resolve(&self, path: &Path) -> PathBuf {
            let mut resolved = PathBuf::new();
            for component in path.components() {
                match component {
                    Component::CurDir => {}
                    Component::ParentDir => {
                        resolved.pop();
                    }
                    other => resolved.push(other),
                }
            }
            resolved
        }
    }
}
