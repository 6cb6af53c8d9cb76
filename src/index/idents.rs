//! Identifier tables: a global per-kind index and a per-package export table.
//!
//! A package's contribution is replaced as a whole on re-index. The lock
//! here is independent of the package registry and is never taken while the
//! registry lock is held.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::index::models::{Ident, IdentKind};

/// Identifiers extracted from one package, keyed as they will be indexed.
#[derive(Debug, Default, Clone)]
pub struct PackageIdents {
    /// `(key, ident)` pairs; methods appear under both `Name` and `Recv.Name`
    pub entries: Vec<(Arc<str>, Ident)>,
}

impl PackageIdents {
    pub fn push(&mut self, key: Arc<str>, ident: Ident) {
        self.entries.push((key, ident));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct IdentIndex {
    inner: RwLock<IdentTables>,
}

#[derive(Default)]
struct IdentTables {
    by_kind: HashMap<IdentKind, HashMap<Arc<str>, Vec<Ident>>>,
    /// Package dir → exported key → declarations
    exports: HashMap<PathBuf, BTreeMap<Arc<str>, Vec<Ident>>>,
    /// Package dir → keys it contributed to `by_kind`
    owned: HashMap<PathBuf, Vec<(IdentKind, Arc<str>)>>,
}

impl IdentTables {
    fn remove(&mut self, dir: &Path) -> bool {
        self.exports.remove(dir);
        let Some(owned) = self.owned.remove(dir) else {
            return false;
        };
        for (kind, key) in owned {
            let Some(names) = self.by_kind.get_mut(&kind) else {
                continue;
            };
            if let Some(idents) = names.get_mut(&key) {
                idents.retain(|i| &*i.dir != dir);
                if idents.is_empty() {
                    names.remove(&key);
                }
            }
        }
        true
    }
}

/// Exported keys carry a capitalized final element (`Name`, `Recv.Name`);
/// bare method names are only indexed globally.
fn is_export_key(key: &str, ident: &Ident) -> bool {
    if ident.kind() == IdentKind::Method && !key.contains('.') {
        return false;
    }
    ident.is_exported()
}

impl IdentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces everything previously recorded for `dir`.
    pub fn replace_package(&self, dir: &Path, idents: PackageIdents) {
        let mut tables = self.inner.write();
        tables.remove(dir);

        let mut exports: BTreeMap<Arc<str>, Vec<Ident>> = BTreeMap::new();
        let mut owned = Vec::with_capacity(idents.len());
        for (key, ident) in idents.entries {
            let kind = ident.kind();
            if is_export_key(&key, &ident) {
                exports
                    .entry(Arc::clone(&key))
                    .or_default()
                    .push(ident.clone());
            }
            tables
                .by_kind
                .entry(kind)
                .or_default()
                .entry(Arc::clone(&key))
                .or_default()
                .push(ident);
            owned.push((kind, key));
        }

        tables.exports.insert(dir.to_path_buf(), exports);
        tables.owned.insert(dir.to_path_buf(), owned);
    }

    /// Drops the identifiers of `dir`; returns whether any were recorded.
    pub fn remove_package(&self, dir: &Path) -> bool {
        self.inner.write().remove(dir)
    }

    /// Declarations of `name` across every kind.
    pub fn lookup(&self, name: &str) -> Vec<Ident> {
        let tables = self.inner.read();
        IdentKind::ALL
            .iter()
            .filter_map(|kind| tables.by_kind.get(kind)?.get(name))
            .flat_map(|idents| idents.iter().cloned())
            .collect()
    }

    pub fn lookup_kind(&self, kind: IdentKind, name: &str) -> Vec<Ident> {
        self.inner
            .read()
            .by_kind
            .get(&kind)
            .and_then(|names| names.get(name))
            .cloned()
            .unwrap_or_default()
    }

    /// Export table of the package in `dir`.
    pub fn exports(&self, dir: &Path) -> Option<BTreeMap<Arc<str>, Vec<Ident>>> {
        self.inner.read().exports.get(dir).cloned()
    }

    pub fn contains_package(&self, dir: &Path) -> bool {
        self.inner.read().owned.contains_key(dir)
    }

    /// Number of distinct names recorded for `kind`.
    pub fn count(&self, kind: IdentKind) -> usize {
        self.inner
            .read()
            .by_kind
            .get(&kind)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}
