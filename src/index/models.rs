use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PackageError;
use crate::fs::FileInfo;

// =====================================================
// Packages
// =====================================================

/// Classification of a Go source file within its package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileClass {
    /// Buildable under the current environment
    GoFile,
    /// `_test.go` file, never subject to build constraints
    TestGoFile,
    /// Excluded by build constraints
    IgnoredGoFile,
}

impl FileClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileClass::GoFile => "go",
            FileClass::TestGoFile => "test",
            FileClass::IgnoredGoFile => "ignored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub name: Arc<str>,
    pub path: PathBuf,
    pub stat: FileInfo,
    pub class: FileClass,
}

/// A directory of Go files under a source root.
///
/// Files are keyed by base name, so a name belongs to exactly one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub dir: PathBuf,
    pub name: Arc<str>,
    pub import_path: Arc<str>,
    /// Workspace root holding `src_root` (GOROOT or a GOPATH entry)
    pub root: PathBuf,
    pub src_root: PathBuf,
    pub goroot: bool,
    pub installed: bool,
    pub stat: FileInfo,
    pub files: BTreeMap<Arc<str>, File>,
    /// Capital-`.S` assembly sources, only tracked next to C sources
    pub asm_files: BTreeMap<Arc<str>, FileInfo>,
    pub error: Option<PackageError>,
}

impl Package {
    pub fn is_command(&self) -> bool {
        &*self.name == "main"
    }

    pub fn files_of(&self, class: FileClass) -> impl Iterator<Item = &File> {
        self.files.values().filter(move |f| f.class == class)
    }

    pub fn go_files(&self) -> impl Iterator<Item = &File> {
        self.files_of(FileClass::GoFile)
    }

    pub fn test_go_files(&self) -> impl Iterator<Item = &File> {
        self.files_of(FileClass::TestGoFile)
    }

    pub fn ignored_go_files(&self) -> impl Iterator<Item = &File> {
        self.files_of(FileClass::IgnoredGoFile)
    }

    /// Sorted names of the files in `class`.
    pub fn file_names(&self, class: FileClass) -> Vec<&str> {
        self.files_of(class).map(|f| &*f.name).collect()
    }

    pub fn class_of(&self, name: &str) -> Option<FileClass> {
        self.files.get(name).map(|f| f.class)
    }

    pub fn has_multiple_packages(&self) -> bool {
        matches!(self.error, Some(PackageError::MultiplePackages { .. }))
    }

    /// Whether the buildable sources differ from `other`'s (names or stats).
    pub fn go_files_changed(&self, other: &Package) -> bool {
        !self.go_files().eq(other.go_files())
    }
}

// =====================================================
// Directory tree
// =====================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub path: PathBuf,
    /// Canonical location, the loop guard's key
    pub real_path: PathBuf,
    pub name: Arc<str>,
    pub pkg_name: Option<Arc<str>>,
    pub has_pkg: bool,
    /// Set when this directory or an ancestor is named `internal`
    pub is_internal: bool,
    pub stat: FileInfo,
    pub children: BTreeMap<Arc<str>, Directory>,
    /// Subdirectories without a package anywhere below them. They are not
    /// part of the tree but are rechecked on every update.
    pub pruned: BTreeMap<Arc<str>, Directory>,
    pub depth: usize,
}

impl Directory {
    /// Live directories hold a package or at least one live child.
    pub fn is_live(&self) -> bool {
        self.has_pkg || !self.children.is_empty()
    }

    /// Finds `path` in this subtree.
    pub fn lookup(&self, path: &Path) -> Option<&Directory> {
        let rel = path.strip_prefix(&self.path).ok()?;
        let mut dir = self;
        for component in rel.components() {
            let name = component.as_os_str().to_str()?;
            dir = dir.children.get(name)?;
        }
        Some(dir)
    }

    /// Pre-order traversal of this subtree.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Directory)) {
        f(self);
        for child in self.children.values() {
            child.walk(f);
        }
    }

    pub fn count(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |_| n += 1);
        n
    }
}

// =====================================================
// Identifiers
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum IdentKind {
    Const = 0,
    Var = 1,
    Type = 2,
    Func = 3,
    Method = 4,
}

impl IdentKind {
    pub const LAST: IdentKind = IdentKind::Method;
    pub const ALL: [IdentKind; 5] = [
        IdentKind::Const,
        IdentKind::Var,
        IdentKind::Type,
        IdentKind::Func,
        IdentKind::Method,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentKind::Const => "const",
            IdentKind::Var => "var",
            IdentKind::Type => "type",
            IdentKind::Func => "func",
            IdentKind::Method => "method",
        }
    }
}

impl fmt::Display for IdentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const OFFSET_BITS: u32 = 32;
const LINE_BITS: u32 = 28;
const KIND_BITS: u32 = 3;
const KIND_SHIFT: u32 = OFFSET_BITS + LINE_BITS;

pub const MAX_OFFSET: usize = (1 << OFFSET_BITS) - 1;
pub const MAX_LINE: usize = (1 << LINE_BITS) - 1;

const _: () = assert!((IdentKind::LAST as u64) < (1 << KIND_BITS));
const _: () = assert!(KIND_SHIFT + KIND_BITS <= 64);

/// Kind, byte offset and line of an identifier packed into one integer:
/// offset in the low 32 bits, then 28 bits of line, then 3 bits of kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypInfo(u64);

impl TypInfo {
    /// Positions that do not fit the encoding are stored as zero.
    pub fn new(kind: IdentKind, offset: usize, line: usize) -> Self {
        let (offset, line) = if offset > MAX_OFFSET || line > MAX_LINE {
            (0, 0)
        } else {
            (offset as u64, line as u64)
        };
        TypInfo(((kind as u64) << KIND_SHIFT) | (line << OFFSET_BITS) | offset)
    }

    pub fn kind(&self) -> IdentKind {
        IdentKind::from_u8((self.0 >> KIND_SHIFT) as u8 & ((1 << KIND_BITS) - 1))
            .unwrap_or(IdentKind::Const)
    }

    pub fn line(&self) -> usize {
        ((self.0 >> OFFSET_BITS) & MAX_LINE as u64) as usize
    }

    pub fn offset(&self) -> usize {
        (self.0 & MAX_OFFSET as u64) as usize
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// One declaration of a top-level identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: Arc<str>,
    pub package_name: Arc<str>,
    pub import_path: Arc<str>,
    pub dir: Arc<Path>,
    pub file: Arc<str>,
    pub info: TypInfo,
}

impl Ident {
    pub fn kind(&self) -> IdentKind {
        self.info.kind()
    }

    pub fn is_exported(&self) -> bool {
        let base = self.name.rsplit('.').next().unwrap_or(&self.name);
        base.chars().next().is_some_and(char::is_uppercase)
    }
}

// =====================================================
// Change notifications
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub path: PathBuf,
}

impl Event {
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, is_dir: bool) -> FileInfo {
        FileInfo {
            name: name.to_string(),
            size: 0,
            mode: 0,
            mtime: None,
            is_dir,
        }
    }

    fn dir(path: &str, has_pkg: bool, children: Vec<Directory>) -> Directory {
        let path = PathBuf::from(path);
        let name: Arc<str> = Arc::from(path.file_name().unwrap().to_str().unwrap());
        Directory {
            stat: info(&name, true),
            name,
            real_path: path.clone(),
            path,
            pkg_name: None,
            has_pkg,
            is_internal: false,
            children: children
                .into_iter()
                .map(|c| (Arc::clone(&c.name), c))
                .collect(),
            pruned: BTreeMap::new(),
            depth: 0,
        }
    }

    #[test]
    fn test_typinfo_projection() {
        let info = TypInfo::new(IdentKind::Method, 1234, 56);
        assert_eq!(info.kind(), IdentKind::Method);
        assert_eq!(info.offset(), 1234);
        assert_eq!(info.line(), 56);
    }

    #[test]
    fn test_typinfo_limits() {
        let info = TypInfo::new(IdentKind::Var, MAX_OFFSET, MAX_LINE);
        assert_eq!(info.kind(), IdentKind::Var);
        assert_eq!(info.offset(), MAX_OFFSET);
        assert_eq!(info.line(), MAX_LINE);

        let overflow = TypInfo::new(IdentKind::Func, MAX_OFFSET + 1, 3);
        assert_eq!(overflow.kind(), IdentKind::Func);
        assert_eq!((overflow.offset(), overflow.line()), (0, 0));
    }

    #[test]
    fn test_typinfo_serializes_as_integer() {
        let info = TypInfo::new(IdentKind::Type, 42, 7);
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, info.raw().to_string());

        let back: TypInfo = serde_json::from_str(&json).unwrap();
        assert_eq!((back.kind(), back.offset(), back.line()), (IdentKind::Type, 42, 7));
    }

    #[test]
    fn test_every_kind_roundtrips() {
        for kind in IdentKind::ALL {
            assert_eq!(TypInfo::new(kind, 1, 1).kind(), kind);
        }
    }

    #[test]
    fn test_ident_exported() {
        let ident = |name: &str| Ident {
            name: Arc::from(name),
            package_name: Arc::from("p"),
            import_path: Arc::from("p"),
            dir: Arc::from(Path::new("/R/src/p")),
            file: Arc::from("p.go"),
            info: TypInfo::new(IdentKind::Func, 0, 1),
        };
        assert!(ident("Exported").is_exported());
        assert!(!ident("internal").is_exported());
        assert!(ident("T.Method").is_exported());
        assert!(!ident("T.method").is_exported());
    }

    #[test]
    fn test_directory_lookup_and_liveness() {
        let tree = dir(
            "/R/src",
            false,
            vec![dir("/R/src/a", false, vec![dir("/R/src/a/b", true, vec![])])],
        );

        assert!(tree.is_live());
        assert_eq!(tree.count(), 3);
        let b = tree.lookup(Path::new("/R/src/a/b")).unwrap();
        assert!(b.has_pkg);
        assert!(tree.lookup(Path::new("/R/src/a/c")).is_none());
        assert!(tree.lookup(Path::new("/elsewhere")).is_none());
        assert_eq!(tree.lookup(Path::new("/R/src")).unwrap().path, tree.path);

        let empty = dir("/R/src/e", false, vec![]);
        assert!(!empty.is_live());
    }
}
