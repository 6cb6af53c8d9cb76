//! Parallel directory walk that keeps the package registry in step with a
//! source root.
//!
//! Each directory runs the package step before its children are walked;
//! children are processed in parallel and awaited by their parent. A
//! directory with neither a package nor a live child is moved out of the
//! tree into its parent's `pruned` map, where later updates still look at it.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::error::IndexError;
use crate::fs::{same_file, FileInfo};
use crate::index::Directory;
use crate::indexer::package::{PackageIndexer, UpdatePass};

const INTERNAL: &str = "internal";

/// Directory names never descended into.
pub fn skip_dir(name: &str) -> bool {
    name == "testdata" || name.starts_with('.') || name.starts_with('_')
}

/// One build or update of the trees for a single pass.
pub struct TreeBuilder<'a> {
    indexer: &'a PackageIndexer,
    pass: &'a UpdatePass,
    max_depth: usize,
    /// Canonical source roots of the pass
    real_roots: Vec<PathBuf>,
    /// Canonical paths walked so far
    visited: Mutex<HashSet<PathBuf>>,
}

struct Candidate {
    name: Arc<str>,
    path: PathBuf,
    real: PathBuf,
    stat: FileInfo,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(indexer: &'a PackageIndexer, pass: &'a UpdatePass, max_depth: usize) -> Self {
        let real_roots = pass
            .roots
            .iter()
            .filter_map(|root| indexer.fs().real_path(root).ok())
            .collect();
        Self {
            indexer,
            pass,
            max_depth,
            real_roots,
            visited: Mutex::new(HashSet::new()),
        }
    }

    /// Walks `root` from scratch.
    pub fn build_root(&self, root: &Path) -> Option<Directory> {
        let stat = match self.indexer.fs().stat(root) {
            Ok(stat) if stat.is_dir => stat,
            Ok(_) => {
                tracing::warn!("source root {} is not a directory", root.display());
                return None;
            }
            Err(e) => {
                tracing::debug!("source root {} unavailable: {}", root.display(), e);
                return None;
            }
        };
        let real = self
            .indexer
            .fs()
            .real_path(root)
            .unwrap_or_else(|_| root.to_path_buf());
        tracing::debug!("building tree for {}", root.display());
        self.build(root, &real, stat, 0, false).filter(Directory::is_live)
    }

    /// Refreshes a tree produced by an earlier pass.
    pub fn update_root(&self, prev: &Directory) -> Option<Directory> {
        tracing::debug!("updating tree for {}", prev.path.display());
        self.update(prev).filter(Directory::is_live)
    }

    /// Removes every package recorded in `tree`.
    pub fn delete_tree(&self, tree: &Directory) {
        tree.walk(&mut |dir| {
            if dir.has_pkg {
                self.indexer.remove_dir(&dir.path);
            }
        });
    }

    /// Check-and-insert on the visited set; `false` on a revisit.
    fn visit(&self, real: &Path) -> bool {
        self.visited.lock().insert(real.to_path_buf())
    }

    fn build(
        &self,
        path: &Path,
        real: &Path,
        stat: FileInfo,
        depth: usize,
        internal: bool,
    ) -> Option<Directory> {
        if !self.visit(real) {
            tracing::trace!("already visited {}", real.display());
            return None;
        }
        if depth >= self.max_depth {
            return Some(self.stub(path, real, stat, depth, internal));
        }
        self.indexer.progress().inc_dir();

        let listing = match self.indexer.fs().read_dir(path) {
            Ok(listing) => listing,
            Err(e) => {
                tracing::debug!("dropping {}: {}", path.display(), e);
                self.indexer.progress().inc_error();
                self.indexer.remove_dir(path);
                return None;
            }
        };

        let pkg_name = self.package_step(path, &stat, Some(&listing));
        let subdirs = self
            .candidates(path, real, &listing)
            .into_par_iter()
            .filter_map(|c| {
                let internal = internal || &*c.name == INTERNAL;
                self.build(&c.path, &c.real, c.stat, depth + 1, internal)
            })
            .collect::<Vec<_>>();

        Some(self.finish(path, real, stat, pkg_name, subdirs, depth, internal))
    }

    fn update(&self, prev: &Directory) -> Option<Directory> {
        let path = prev.path.as_path();
        let real = prev.real_path.as_path();
        if !self.visit(real) {
            return None;
        }

        let stat = match self.indexer.fs().stat(path) {
            Ok(stat) if stat.is_dir => stat,
            Ok(_) | Err(_) => {
                tracing::debug!("{} is gone", path.display());
                self.delete_tree(prev);
                return None;
            }
        };
        if prev.depth >= self.max_depth {
            return Some(self.stub(path, real, stat, prev.depth, prev.is_internal));
        }
        self.indexer.progress().inc_dir();

        if same_file(Some(&prev.stat), Some(&stat)) {
            // A new Go file changes the directory stat, so a directory
            // without a package stays without one. Subdirectories, pruned
            // ones included, may still have changed below.
            let pkg_name = if prev.has_pkg {
                self.package_step(path, &stat, None)
            } else {
                None
            };
            let subdirs = prev
                .children
                .par_iter()
                .chain(prev.pruned.par_iter())
                .filter_map(|(_, child)| self.update(child))
                .collect::<Vec<_>>();
            return Some(self.finish(
                path,
                real,
                stat,
                pkg_name,
                subdirs,
                prev.depth,
                prev.is_internal,
            ));
        }

        let listing = match self.indexer.fs().read_dir(path) {
            Ok(listing) => listing,
            Err(e) => {
                tracing::debug!("dropping {}: {}", path.display(), e);
                self.indexer.progress().inc_error();
                self.delete_tree(prev);
                return None;
            }
        };

        let pkg_name = self.package_step(path, &stat, Some(&listing));
        let candidates = self.candidates(path, real, &listing);

        let present: HashSet<&str> = candidates.iter().map(|c| &*c.name).collect();
        for (name, child) in &prev.children {
            if !present.contains(&**name) {
                tracing::debug!("{} vanished", child.path.display());
                self.delete_tree(child);
            }
        }

        let depth = prev.depth;
        let internal = prev.is_internal;
        let subdirs = candidates
            .par_iter()
            .filter_map(|c| {
                let known = prev
                    .children
                    .get(&c.name)
                    .or_else(|| prev.pruned.get(&c.name));
                match known {
                    Some(child) if child.real_path == c.real => self.update(child),
                    known => {
                        // Retargeted symlink: the old subtree is unrelated.
                        if let Some(child) = known {
                            self.delete_tree(child);
                        }
                        let internal = internal || &*c.name == INTERNAL;
                        self.build(&c.path, &c.real, c.stat.clone(), depth + 1, internal)
                    }
                }
            })
            .collect::<Vec<_>>();

        Some(self.finish(path, real, stat, pkg_name, subdirs, depth, internal))
    }

    /// Runs the package indexer; the package name when one exists.
    fn package_step(
        &self,
        path: &Path,
        stat: &FileInfo,
        listing: Option<&[FileInfo]>,
    ) -> Option<Arc<str>> {
        match self.indexer.index_dir(self.pass, path, stat, listing) {
            Ok(pkg) => Some(Arc::clone(&pkg.name)),
            Err(IndexError::Io(e)) => {
                tracing::debug!("package step for {} failed: {}", path.display(), e);
                None
            }
            Err(e) => {
                tracing::trace!("{}", e);
                None
            }
        }
    }

    /// Subdirectories of `path` (canonically `real`) worth descending into.
    ///
    /// A symlink is followed unless it points at an ancestor of `path` or
    /// into a source root, which is walked through its own path anyway.
    fn candidates(&self, path: &Path, real: &Path, listing: &[FileInfo]) -> Vec<Candidate> {
        let fs = self.indexer.fs();
        let mut out = Vec::new();

        for entry in listing {
            if skip_dir(&entry.name) || !(entry.is_dir || entry.is_symlink()) {
                continue;
            }
            let child = path.join(&entry.name);
            let (stat, child_real) = if entry.is_symlink() {
                let target = match fs.stat(&child) {
                    Ok(target) if target.is_dir => target,
                    _ => continue,
                };
                let Ok(target_real) = fs.real_path(&child) else {
                    continue;
                };
                if real.starts_with(&target_real) {
                    tracing::warn!("skipping symlink cycle at {}", child.display());
                    continue;
                }
                if self.real_roots.iter().any(|r| target_real.starts_with(r)) {
                    tracing::debug!("{} links into a source root, skipping", child.display());
                    continue;
                }
                (target, target_real)
            } else {
                (entry.clone(), real.join(&entry.name))
            };
            out.push(Candidate {
                name: self.indexer.interner().intern(&entry.name),
                path: child,
                real: child_real,
                stat,
            });
        }
        out
    }

    fn stub(
        &self,
        path: &Path,
        real: &Path,
        stat: FileInfo,
        depth: usize,
        internal: bool,
    ) -> Directory {
        Directory {
            path: path.to_path_buf(),
            real_path: real.to_path_buf(),
            name: self.dir_name(path),
            pkg_name: None,
            has_pkg: false,
            is_internal: internal,
            stat,
            children: BTreeMap::new(),
            pruned: BTreeMap::new(),
            depth,
        }
    }

    /// Assembles a node, sorting `subdirs` into live children (depth stubs
    /// count as live) and pruned ones.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        path: &Path,
        real: &Path,
        stat: FileInfo,
        pkg_name: Option<Arc<str>>,
        subdirs: Vec<Directory>,
        depth: usize,
        internal: bool,
    ) -> Directory {
        let mut children = BTreeMap::new();
        let mut pruned = BTreeMap::new();
        for dir in subdirs {
            let name = Arc::clone(&dir.name);
            if dir.is_live() || dir.depth >= self.max_depth {
                children.insert(name, dir);
            } else {
                pruned.insert(name, dir);
            }
        }
        Directory {
            path: path.to_path_buf(),
            real_path: real.to_path_buf(),
            name: self.dir_name(path),
            has_pkg: pkg_name.is_some(),
            pkg_name,
            is_internal: internal,
            stat,
            children,
            pruned,
            depth,
        }
    }

    fn dir_name(&self, path: &Path) -> Arc<str> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        self.indexer.interner().intern(&name)
    }
}
