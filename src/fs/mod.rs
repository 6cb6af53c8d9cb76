//! Filesystem access with bounded concurrency.
//!
//! Every operation acquires a permit from one of two gates (open files and
//! open directories) for as long as the underlying handle is open. Errors are
//! the untouched `std::io::Error` of the failing call.

mod gate;

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub use gate::{Gate, Permit};

use crate::config::{DEFAULT_MAX_OPEN_DIRS, DEFAULT_MAX_OPEN_FILES};

/// Structural stat record.
///
/// Equality is field-wise over `name`, `size`, `mode`, `mtime` and `is_dir`,
/// which is what [`same_file`] decides invalidation on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub mtime: Option<SystemTime>,
    pub is_dir: bool,
}

impl FileInfo {
    pub fn from_metadata(name: impl Into<String>, meta: &fs::Metadata) -> Self {
        Self {
            name: name.into(),
            size: meta.len(),
            mode: file_mode(meta),
            mtime: meta.modified().ok(),
            is_dir: meta.is_dir(),
        }
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    pub fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }
}

/// `true` when both are absent, or both present and structurally equal.
pub fn same_file(a: Option<&FileInfo>, b: Option<&FileInfo>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Whether `err` is a failure tied to the path itself (missing, not a
/// directory, permission denied) rather than a device or resource error.
pub fn is_path_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied | io::ErrorKind::NotADirectory
    )
}

pub fn is_not_exist(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

const S_IFMT: u32 = 0o170000;
#[cfg_attr(unix, allow(dead_code))]
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn file_mode(meta: &fs::Metadata) -> u32 {
    let ft = meta.file_type();
    let kind = if ft.is_dir() {
        S_IFDIR
    } else if ft.is_symlink() {
        S_IFLNK
    } else {
        S_IFREG
    };
    let perm = if meta.permissions().readonly() { 0o444 } else { 0o644 };
    kind | perm
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[derive(Debug)]
pub struct GatedFs {
    files: Gate,
    dirs: Gate,
}

impl Default for GatedFs {
    fn default() -> Self {
        Self::new(Some(DEFAULT_MAX_OPEN_FILES), Some(DEFAULT_MAX_OPEN_DIRS))
    }
}

impl GatedFs {
    pub fn new(max_open_files: Option<usize>, max_open_dirs: Option<usize>) -> Self {
        Self {
            files: Gate::new(max_open_files),
            dirs: Gate::new(max_open_dirs),
        }
    }

    pub fn ungated() -> Self {
        Self::new(None, None)
    }

    pub fn file_gate(&self) -> &Gate {
        &self.files
    }

    pub fn dir_gate(&self) -> &Gate {
        &self.dirs
    }

    /// Stat following symlinks.
    pub fn stat(&self, path: &Path) -> io::Result<FileInfo> {
        let _permit = self.files.acquire();
        let meta = fs::metadata(path)?;
        Ok(FileInfo::from_metadata(base_name(path), &meta))
    }

    /// Stat without following a final symlink.
    pub fn lstat(&self, path: &Path) -> io::Result<FileInfo> {
        let _permit = self.files.acquire();
        let meta = fs::symlink_metadata(path)?;
        Ok(FileInfo::from_metadata(base_name(path), &meta))
    }

    /// Entry names of `path`, sorted.
    pub fn read_dir_names(&self, path: &Path) -> io::Result<Vec<String>> {
        let _permit = self.dirs.acquire();
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    tracing::trace!("skipping non UTF-8 entry {:?} in {}", raw, path.display())
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Entries of `path` with lstat information, sorted by name.
    ///
    /// Entries that disappear between listing and stat are dropped.
    pub fn read_dir(&self, path: &Path) -> io::Result<Vec<FileInfo>> {
        let _permit = self.dirs.acquire();
        let mut infos = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            match entry.metadata() {
                Ok(meta) => infos.push(FileInfo::from_metadata(name, &meta)),
                Err(e) => tracing::trace!("dropping {}/{}: {}", path.display(), name, e),
            }
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    pub fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        let _permit = self.files.acquire();
        fs::read(path)
    }

    pub fn open_file(&self, path: &Path) -> io::Result<GatedFile<'_>> {
        let permit = self.files.acquire();
        let file = fs::File::open(path)?;
        Ok(GatedFile {
            file,
            path: path.to_path_buf(),
            _permit: permit,
        })
    }

    /// Absolute path with every symlink resolved.
    pub fn real_path(&self, path: &Path) -> io::Result<PathBuf> {
        let _permit = self.files.acquire();
        fs::canonicalize(path)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }
}

/// Open file that holds a gate permit until dropped.
pub struct GatedFile<'a> {
    file: fs::File,
    path: PathBuf,
    _permit: Permit<'a>,
}

impl GatedFile<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stat(&self) -> io::Result<FileInfo> {
        let meta = self.file.metadata()?;
        Ok(FileInfo::from_metadata(base_name(&self.path), &meta))
    }
}

impl Read for GatedFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}
