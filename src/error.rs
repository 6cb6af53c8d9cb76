use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, CorpusError>;

/// Structural problems recorded on a [`Package`](crate::index::Package).
///
/// The package stays in the registry with its best-effort name and files;
/// a later update that resolves the problem clears it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackageError {
    #[error("no buildable Go source files in {}", .dir.display())]
    NoBuildableSources { dir: PathBuf },

    #[error(
        "found packages {} ({}) and {} ({}) in {}",
        .names[0], .files[0], .names[1], .files[1], .dir.display()
    )]
    MultiplePackages {
        dir: PathBuf,
        names: [String; 2],
        files: [String; 2],
    },
}

/// Why the package indexer produced no package for a directory.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("directory {} is not inside a source root", .0.display())]
    NotInSourceRoot(PathBuf),

    #[error("no Go files in {}", .0.display())]
    NoGoFiles(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
