//! Incrementally updated in-memory index of the Go packages below a set of
//! source roots.
//!
//! A [`Corpus`] walks every source root of its [`Environment`], classifies
//! the Go files of each directory under the environment's build
//! constraints and keeps a [`PackageRegistry`] current across updates.
//! Optionally it extracts the top-level identifiers of every package.

pub mod config;
pub mod corpus;
pub mod env;
pub mod error;
pub mod fs;
pub mod index;
pub mod indexer;
pub mod intern;
pub mod languages;

pub use config::Config;
pub use corpus::Corpus;
pub use env::{
    BuildContext, CachedEnvironment, EnvSnapshot, Environment, EnvironmentProvider,
    StaticEnvironment,
};
pub use error::{CorpusError, IndexError, PackageError, Result};
pub use fs::{same_file, FileInfo, GatedFs};
pub use index::{
    Directory, Event, EventKind, File, FileClass, Ident, IdentIndex, IdentKind, Package,
    PackageRegistry, TypInfo,
};
pub use indexer::{ProgressSnapshot, UpdateProgress};
pub use intern::Interner;
