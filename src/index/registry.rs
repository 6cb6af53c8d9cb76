//! Per-root map of import path to package, plus a bare-name index.
//!
//! Both maps sit behind one reader/writer lock, so inserting a package and
//! updating the name index is a single atomic step for readers.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::env::import_path;
use crate::index::models::Package;

#[derive(Default)]
pub struct PackageRegistry {
    inner: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    by_path: BTreeMap<PathBuf, BTreeMap<Arc<str>, Arc<Package>>>,
    by_name: HashMap<Arc<str>, PathBuf>,
}

impl Tables {
    fn get(&self, dir: &Path) -> Option<&Arc<Package>> {
        let (src_root, pkgs) = self
            .by_path
            .iter()
            .filter(|(root, _)| dir.starts_with(root))
            .max_by_key(|(root, _)| root.components().count())?;
        let import_path = import_path(src_root, dir)?;
        pkgs.get(import_path.as_str())
    }

    /// Whether `pkg` should own its name: the first package in source root
    /// then import path order does, whatever the insertion order.
    fn owns_name(&self, pkg: &Package) -> bool {
        match self.by_name.get(&pkg.name).and_then(|dir| self.get(dir)) {
            Some(current) => {
                (&pkg.src_root, &pkg.import_path) <= (&current.src_root, &current.import_path)
            }
            None => true,
        }
    }

    /// Points `name` at the first remaining package with that name, if any.
    fn repoint_name(&mut self, name: &Arc<str>) {
        let replacement = self
            .by_path
            .values()
            .flat_map(|pkgs| pkgs.values())
            .find(|p| &p.name == name)
            .map(|p| p.dir.clone());
        match replacement {
            Some(dir) => {
                self.by_name.insert(Arc::clone(name), dir);
            }
            None => {
                self.by_name.remove(name);
            }
        }
    }

    fn remove(&mut self, src_root: &Path, import_path: &str) -> Option<Arc<Package>> {
        let pkgs = self.by_path.get_mut(src_root)?;
        let removed = pkgs.remove(import_path)?;
        if pkgs.is_empty() {
            self.by_path.remove(src_root);
        }
        if self.by_name.get(&removed.name) == Some(&removed.dir) {
            self.repoint_name(&removed.name);
        }
        Some(removed)
    }
}

fn indexes_name(pkg: &Package) -> bool {
    !pkg.name.is_empty() && !pkg.is_command()
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `pkg`, returning the package it replaced.
    pub fn insert(&self, pkg: Arc<Package>) -> Option<Arc<Package>> {
        let mut tables = self.inner.write();
        let previous = tables
            .by_path
            .entry(pkg.src_root.clone())
            .or_default()
            .insert(Arc::clone(&pkg.import_path), Arc::clone(&pkg));

        if let Some(prev) = &previous {
            if prev.name != pkg.name && tables.by_name.get(&prev.name) == Some(&prev.dir) {
                tables.repoint_name(&prev.name);
            }
        }
        if indexes_name(&pkg) && tables.owns_name(&pkg) {
            tables.by_name.insert(Arc::clone(&pkg.name), pkg.dir.clone());
        }
        previous
    }

    pub fn delete(&self, src_root: &Path, import_path: &str) -> Option<Arc<Package>> {
        self.inner.write().remove(src_root, import_path)
    }

    /// Deletes the package whose directory is `dir`.
    pub fn delete_dir(&self, dir: &Path) -> Option<Arc<Package>> {
        let mut tables = self.inner.write();
        let pkg = tables.get(dir).cloned()?;
        tables.remove(&pkg.src_root, &pkg.import_path)
    }

    /// Drops every package under `src_root`.
    pub fn delete_root(&self, src_root: &Path) -> Vec<Arc<Package>> {
        let mut tables = self.inner.write();
        let import_paths: Vec<Arc<str>> = tables
            .by_path
            .get(src_root)
            .map(|pkgs| pkgs.keys().cloned().collect())
            .unwrap_or_default();
        import_paths
            .iter()
            .filter_map(|ip| tables.remove(src_root, ip))
            .collect()
    }

    pub fn lookup_by_path(&self, dir: &Path) -> Option<Arc<Package>> {
        self.inner.read().get(dir).cloned()
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<Package>> {
        let tables = self.inner.read();
        let dir = tables.by_name.get(name)?;
        tables.get(dir).cloned()
    }

    pub fn get(&self, src_root: &Path, import_path: &str) -> Option<Arc<Package>> {
        self.inner
            .read()
            .by_path
            .get(src_root)?
            .get(import_path)
            .cloned()
    }

    /// Snapshot of all packages, ordered by source root then import path.
    pub fn packages(&self) -> Vec<Arc<Package>> {
        self.inner
            .read()
            .by_path
            .values()
            .flat_map(|pkgs| pkgs.values().cloned())
            .collect()
    }

    pub fn src_roots(&self) -> Vec<PathBuf> {
        self.inner.read().by_path.keys().cloned().collect()
    }

    /// Snapshot of the name index.
    pub fn names(&self) -> HashMap<Arc<str>, PathBuf> {
        self.inner.read().by_name.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_path.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileInfo;

    fn package(src_root: &str, import_path: &str, name: &str) -> Arc<Package> {
        let src_root = PathBuf::from(src_root);
        let dir = src_root.join(import_path);
        Arc::new(Package {
            stat: FileInfo {
                name: import_path.rsplit('/').next().unwrap().to_string(),
                size: 0,
                mode: 0,
                mtime: None,
                is_dir: true,
            },
            root: src_root.parent().unwrap().to_path_buf(),
            dir,
            name: Arc::from(name),
            import_path: Arc::from(import_path),
            src_root,
            goroot: false,
            installed: false,
            files: BTreeMap::new(),
            asm_files: BTreeMap::new(),
            error: None,
        })
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = PackageRegistry::new();
        registry.insert(package("/R/src", "a/b", "b"));

        let by_path = registry.lookup_by_path(Path::new("/R/src/a/b")).unwrap();
        assert_eq!(&*by_path.import_path, "a/b");
        let by_name = registry.lookup_by_name("b").unwrap();
        assert_eq!(by_name.dir, PathBuf::from("/R/src/a/b"));
        assert_eq!(registry.get(Path::new("/R/src"), "a/b").unwrap().dir, by_name.dir);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_commands_are_not_name_indexed() {
        let registry = PackageRegistry::new();
        registry.insert(package("/R/src", "cmd/tool", "main"));

        assert!(registry.lookup_by_name("main").is_none());
        assert!(registry.lookup_by_path(Path::new("/R/src/cmd/tool")).is_some());
    }

    #[test]
    fn test_delete_clears_name_index() {
        let registry = PackageRegistry::new();
        registry.insert(package("/R/src", "a", "a"));

        let removed = registry.delete(Path::new("/R/src"), "a").unwrap();
        assert_eq!(&*removed.name, "a");
        assert!(registry.lookup_by_name("a").is_none());
        assert!(registry.is_empty());
        assert!(registry.src_roots().is_empty());
    }

    #[test]
    fn test_delete_repoints_shared_name() {
        let registry = PackageRegistry::new();
        registry.insert(package("/R/src", "x/util", "util"));
        registry.insert(package("/R/src", "y/util", "util"));
        assert_eq!(
            registry.lookup_by_name("util").unwrap().dir,
            PathBuf::from("/R/src/x/util")
        );

        registry.delete_dir(Path::new("/R/src/x/util"));
        assert_eq!(
            registry.lookup_by_name("util").unwrap().dir,
            PathBuf::from("/R/src/y/util")
        );
    }

    #[test]
    fn test_shared_name_ignores_insertion_order() {
        let forward = PackageRegistry::new();
        forward.insert(package("/A/src", "z/log", "log"));
        forward.insert(package("/B/src", "a/log", "log"));
        forward.insert(package("/A/src", "m/log", "log"));

        let backward = PackageRegistry::new();
        backward.insert(package("/A/src", "m/log", "log"));
        backward.insert(package("/B/src", "a/log", "log"));
        backward.insert(package("/A/src", "z/log", "log"));

        let expected = PathBuf::from("/A/src/m/log");
        assert_eq!(forward.lookup_by_name("log").unwrap().dir, expected);
        assert_eq!(backward.lookup_by_name("log").unwrap().dir, expected);
    }

    #[test]
    fn test_rename_updates_name_index() {
        let registry = PackageRegistry::new();
        registry.insert(package("/R/src", "a", "old"));
        let previous = registry.insert(package("/R/src", "a", "new"));

        assert_eq!(&*previous.unwrap().name, "old");
        assert!(registry.lookup_by_name("old").is_none());
        assert!(registry.lookup_by_name("new").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_uses_longest_root() {
        let registry = PackageRegistry::new();
        registry.insert(package("/R/src", "nested/src/p", "outer"));
        registry.insert(package("/R/src/nested/src", "p", "inner"));

        let pkg = registry.lookup_by_path(Path::new("/R/src/nested/src/p")).unwrap();
        assert_eq!(&*pkg.name, "inner");
    }

    #[test]
    fn test_delete_root() {
        let registry = PackageRegistry::new();
        registry.insert(package("/A/src", "a", "a"));
        registry.insert(package("/A/src", "b", "b"));
        registry.insert(package("/B/src", "c", "c"));

        let removed = registry.delete_root(Path::new("/A/src"));
        assert_eq!(removed.len(), 2);
        assert!(registry.lookup_by_name("a").is_none());
        assert!(registry.lookup_by_name("c").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_name_index_consistency() {
        let registry = PackageRegistry::new();
        registry.insert(package("/R/src", "a", "a"));
        registry.insert(package("/R/src", "b", "b"));
        registry.insert(package("/R/src", "cmd/c", "main"));

        for (name, dir) in registry.names() {
            let pkg = registry.lookup_by_path(&dir).unwrap();
            assert_eq!(pkg.name, name);
            assert_ne!(&*name, "main");
        }
    }
}
