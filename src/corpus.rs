//! The public entry point: a set of directory trees, one per source root,
//! and the package and identifier indexes they feed.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver};
use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::env::{find_src_root, CachedEnvironment, EnvironmentProvider};
use crate::error::Result;
use crate::fs::GatedFs;
use crate::index::{Directory, Event, Ident, IdentIndex, IdentKind, Package, PackageRegistry};
use crate::indexer::{PackageIndexer, ProgressSnapshot, TreeBuilder, UpdatePass, UpdateProgress};
use crate::intern::Interner;

pub struct Corpus {
    config: Config,
    fs: Arc<GatedFs>,
    provider: Arc<dyn EnvironmentProvider>,
    registry: Arc<PackageRegistry>,
    idents: Arc<IdentIndex>,
    indexer: PackageIndexer,
    trees: RwLock<BTreeMap<PathBuf, Arc<Directory>>>,
    /// Serializes updates; holds the environment generation of the last one.
    last_generation: Mutex<Option<u64>>,
    events: Receiver<Event>,
    progress: UpdateProgress,
}

impl Corpus {
    /// A corpus over the Go environment of the current process.
    pub fn new(config: Config) -> Self {
        let fs = Arc::new(GatedFs::new(config.open_files_limit(), config.open_dirs_limit()));
        let provider = Arc::new(CachedEnvironment::from_process(
            Arc::clone(&fs),
            config.update_interval,
        ));
        Self::build(config, fs, provider)
    }

    /// A corpus over a caller-supplied environment.
    pub fn with_environment(config: Config, provider: Arc<dyn EnvironmentProvider>) -> Self {
        let fs = Arc::new(GatedFs::new(config.open_files_limit(), config.open_dirs_limit()));
        Self::build(config, fs, provider)
    }

    fn build(config: Config, fs: Arc<GatedFs>, provider: Arc<dyn EnvironmentProvider>) -> Self {
        let registry = Arc::new(PackageRegistry::new());
        let idents = Arc::new(IdentIndex::new());
        let progress = UpdateProgress::new();
        let (tx, rx) = unbounded();

        let mut indexer = PackageIndexer::new(
            Arc::clone(&fs),
            Arc::clone(&registry),
            Arc::clone(&idents),
            Arc::new(Interner::new()),
        )
        .with_identifiers(config.index_identifiers)
        .with_progress(progress.clone());
        if config.log_events {
            indexer = indexer.with_events(tx);
        }

        Self {
            config,
            fs,
            provider,
            registry,
            idents,
            indexer,
            trees: RwLock::new(BTreeMap::new()),
            last_generation: Mutex::new(None),
            events: rx,
            progress,
        }
    }

    /// First sweep over every source root.
    pub fn init(&self) -> Result<()> {
        self.update()
    }

    /// Brings every tree and the registry in line with the disk.
    ///
    /// Per-directory failures are dropped; only a failure to obtain the
    /// environment is returned.
    pub fn update(&self) -> Result<()> {
        let mut last_generation = self.last_generation.lock();
        let snapshot = self.provider.acquire()?;
        let reclassify = last_generation.is_some_and(|g| g != snapshot.generation);
        if reclassify {
            tracing::debug!("environment changed, reclassifying all files");
        }

        let pass = UpdatePass::new(snapshot.env, reclassify);
        let builder = TreeBuilder::new(&self.indexer, &pass, self.config.depth_limit());
        self.progress.start();

        let prev = self.trees.read().clone();
        let mut next = BTreeMap::new();
        for root in &pass.roots {
            if next.contains_key(root) {
                continue;
            }
            let tree = match prev.get(root) {
                Some(tree) => builder.update_root(tree),
                None => builder.build_root(root),
            };
            if let Some(tree) = tree {
                next.insert(root.clone(), Arc::new(tree));
            }
        }

        for (root, tree) in &prev {
            if !pass.roots.contains(root) {
                tracing::debug!("source root {} removed", root.display());
                builder.delete_tree(tree);
            }
        }
        for src_root in self.registry.src_roots() {
            if !pass.roots.contains(&src_root) {
                self.indexer.remove_root(&src_root);
            }
        }

        *self.trees.write() = next;
        *last_generation = Some(snapshot.generation);
        self.progress.finish();

        let stats = self.progress.snapshot();
        tracing::debug!(
            "update finished: {} dirs, {} packages, {} deleted, {} errors in {:?}",
            stats.dirs_visited,
            stats.packages_indexed,
            stats.packages_deleted,
            stats.errors,
            stats.elapsed,
        );
        Ok(())
    }

    /// Package directories importable from `reference`, sorted.
    ///
    /// Commands, packages without a name and `reference` itself are left
    /// out, as are `internal` packages not rooted above `reference`.
    pub fn list_imports(&self, reference: &Path) -> Vec<PathBuf> {
        let trees = self.trees.read();
        let mut out = Vec::new();
        for tree in trees.values() {
            tree.walk(&mut |dir| {
                if !dir.has_pkg || dir.path == reference {
                    return;
                }
                if matches!(dir.pkg_name.as_deref(), None | Some("") | Some("main")) {
                    return;
                }
                if dir.is_internal && !internal_visible(&dir.path, reference) {
                    return;
                }
                out.push(dir.path.clone());
            });
        }
        out.sort();
        out.dedup();
        out
    }

    /// Directory node for `path`, if it is part of a tree.
    pub fn lookup(&self, path: &Path) -> Option<Directory> {
        let trees = self.trees.read();
        let roots: Vec<PathBuf> = trees.keys().cloned().collect();
        let root = find_src_root(&roots, path)?;
        trees.get(root)?.lookup(path).cloned()
    }

    pub fn lookup_package(&self, path: &Path) -> Option<Arc<Package>> {
        self.registry.lookup_by_path(path)
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<Package>> {
        self.registry.lookup_by_name(name)
    }

    /// Snapshot of all packages, ordered by source root and import path.
    pub fn packages(&self) -> Vec<Arc<Package>> {
        self.registry.packages()
    }

    /// Roots that currently have a tree.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.trees.read().keys().cloned().collect()
    }

    /// Change notifications, in the order the registry changed. Nothing is
    /// sent unless `log_events` is set.
    pub fn events(&self) -> Receiver<Event> {
        self.events.clone()
    }

    pub fn lookup_ident(&self, name: &str) -> Vec<Ident> {
        self.idents.lookup(name)
    }

    pub fn lookup_ident_kind(&self, kind: IdentKind, name: &str) -> Vec<Ident> {
        self.idents.lookup_kind(kind, name)
    }

    /// Exported identifiers of the package in `dir`.
    pub fn exports(&self, dir: &Path) -> Option<BTreeMap<Arc<str>, Vec<Ident>>> {
        self.idents.exports(dir)
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn fs(&self) -> &GatedFs {
        &self.fs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// An `internal` directory is visible to code under the parent of its last
/// `internal` element.
fn internal_visible(dir: &Path, reference: &Path) -> bool {
    let components: Vec<Component> = dir.components().collect();
    let Some(pos) = components
        .iter()
        .rposition(|c| c.as_os_str() == "internal")
    else {
        return true;
    };
    let parent: PathBuf = components[..pos].iter().collect();
    reference.starts_with(parent)
}
