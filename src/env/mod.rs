//! Build environment: source roots, target platform and build constraints.
//!
//! The indexer only talks to the [`Environment`] trait. [`BuildContext`] is
//! the Go toolchain implementation; [`CachedEnvironment`] re-derives it from
//! the process environment when the relevant variables change.

pub mod cache;
pub mod constraint;
pub mod context;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

pub use cache::CachedEnvironment;
pub use context::BuildContext;

use crate::error::Result;

pub trait Environment: Send + Sync {
    /// Source roots in precedence order. Callers must not keep this across
    /// updates.
    fn source_roots(&self) -> Vec<PathBuf>;

    /// The source root of the standard library.
    fn standard_tree_root(&self) -> PathBuf;

    fn os(&self) -> &str;
    fn arch(&self) -> &str;
    fn build_tags(&self) -> &[String];
    fn cgo_enabled(&self) -> bool;

    /// Whether `dir/name` takes part in the build under the current
    /// platform and tags.
    fn match_file(&self, dir: &Path, name: &str) -> bool;

    /// Install location of a package as `(root, path relative to root)`.
    fn target_path(
        &self,
        src_root: &Path,
        import_path: &str,
        is_command: bool,
    ) -> Option<(PathBuf, PathBuf)>;
}

/// An environment together with a counter that changes whenever the
/// environment was recomputed.
#[derive(Clone)]
pub struct EnvSnapshot {
    pub env: Arc<dyn Environment>,
    pub generation: u64,
}

/// Hands out the environment to use for one update pass.
pub trait EnvironmentProvider: Send + Sync {
    fn acquire(&self) -> Result<EnvSnapshot>;
}

/// A caller-supplied environment that only changes through [`replace`].
///
/// [`replace`]: StaticEnvironment::replace
pub struct StaticEnvironment {
    current: RwLock<EnvSnapshot>,
}

impl StaticEnvironment {
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self {
            current: RwLock::new(EnvSnapshot { env, generation: 1 }),
        }
    }

    pub fn replace(&self, env: Arc<dyn Environment>) {
        let mut current = self.current.write();
        current.env = env;
        current.generation += 1;
    }
}

impl EnvironmentProvider for StaticEnvironment {
    fn acquire(&self) -> Result<EnvSnapshot> {
        Ok(self.current.read().clone())
    }
}

/// Source root of `dir`: the longest root that is a prefix of it.
pub fn find_src_root<'a>(roots: &'a [PathBuf], dir: &Path) -> Option<&'a PathBuf> {
    roots
        .iter()
        .filter(|root| dir.starts_with(root))
        .max_by_key(|root| root.components().count())
}

/// Slash-separated import path of `dir` below `src_root`.
pub fn import_path(src_root: &Path, dir: &Path) -> Option<String> {
    let rel = dir.strip_prefix(src_root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}
