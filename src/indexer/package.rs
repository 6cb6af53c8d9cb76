//! Decides whether a directory holds a package and keeps its registry entry
//! current.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::env::{find_src_root, import_path, Environment};
use crate::error::{IndexError, PackageError};
use crate::fs::{same_file, FileInfo, GatedFs};
use crate::index::{Event, EventKind, File, FileClass, IdentIndex, Package, PackageRegistry};
use crate::indexer::extractor::IdentExtractor;
use crate::indexer::parser::Parser;
use crate::indexer::progress::UpdateProgress;
use crate::intern::Interner;
use crate::languages::GoGrammar;

/// Environment state fixed for the duration of one update.
pub struct UpdatePass {
    pub env: Arc<dyn Environment>,
    pub roots: Vec<PathBuf>,
    /// Set when the environment changed since the previous pass; prior file
    /// classes are then never reused.
    pub reclassify: bool,
}

impl UpdatePass {
    pub fn new(env: Arc<dyn Environment>, reclassify: bool) -> Self {
        let roots = env.source_roots();
        Self {
            env,
            roots,
            reclassify,
        }
    }
}

/// Candidate sources of one directory, before classification.
#[derive(Default)]
struct Sources {
    go: Vec<(Arc<str>, FileInfo)>,
    asm: BTreeMap<Arc<str>, FileInfo>,
}

/// Shared state the indexer publishes into.
pub struct PackageIndexer {
    fs: Arc<GatedFs>,
    registry: Arc<PackageRegistry>,
    idents: Arc<IdentIndex>,
    interner: Arc<Interner>,
    parser: Parser,
    events: Option<Sender<Event>>,
    index_identifiers: bool,
    progress: UpdateProgress,
}

impl PackageIndexer {
    pub fn new(
        fs: Arc<GatedFs>,
        registry: Arc<PackageRegistry>,
        idents: Arc<IdentIndex>,
        interner: Arc<Interner>,
    ) -> Self {
        Self {
            fs,
            registry,
            idents,
            interner,
            parser: Parser::new(),
            events: None,
            index_identifiers: false,
            progress: UpdateProgress::new(),
        }
    }

    pub fn with_events(mut self, events: Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_identifiers(mut self, enabled: bool) -> Self {
        self.index_identifiers = enabled;
        self
    }

    pub fn with_progress(mut self, progress: UpdateProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn fs(&self) -> &GatedFs {
        &self.fs
    }

    pub fn progress(&self) -> &UpdateProgress {
        &self.progress
    }

    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// Indexes `dir` and publishes the result.
    ///
    /// `listing` is the directory's entries when the caller already read
    /// them. A directory without Go files has its prior package removed.
    pub fn index_dir(
        &self,
        pass: &UpdatePass,
        dir: &Path,
        stat: &FileInfo,
        listing: Option<&[FileInfo]>,
    ) -> Result<Arc<Package>, IndexError> {
        let src_root = find_src_root(&pass.roots, dir)
            .ok_or_else(|| IndexError::NotInSourceRoot(dir.to_path_buf()))?;
        let import_path = import_path(src_root, dir)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| IndexError::NotInSourceRoot(dir.to_path_buf()))?;

        let prior = self.registry.get(src_root, &import_path);

        let sources = match &prior {
            Some(prior) if same_file(Some(&prior.stat), Some(stat)) => self.restat_files(prior),
            _ => match self.list_files(dir, listing) {
                Ok(sources) => sources,
                Err(e) => {
                    self.progress.inc_error();
                    self.remove_dir(dir);
                    return Err(IndexError::Io(e));
                }
            },
        };

        let mut files = self.classify(pass, dir, prior.as_deref(), sources.go);
        if files.is_empty() {
            self.remove_dir(dir);
            return Err(IndexError::NoGoFiles(dir.to_path_buf()));
        }

        let (name, error) = match prior.as_deref() {
            Some(prior) if !pass.reclassify && reusable_name(prior, &files) => {
                (prior.name.to_string(), prior.error.clone())
            }
            _ => self.resolve_name(dir, &mut files),
        };

        let is_command = name == "main";
        let installed = pass
            .env
            .target_path(src_root, &import_path, is_command)
            .map(|(root, rel)| self.fs.exists(&root.join(rel)))
            .unwrap_or(false);

        let pkg = Package {
            dir: dir.to_path_buf(),
            name: self.interner.intern(&name),
            import_path: self.interner.intern(&import_path),
            root: src_root.parent().unwrap_or(src_root.as_path()).to_path_buf(),
            src_root: src_root.clone(),
            goroot: *src_root == pass.env.standard_tree_root(),
            installed,
            stat: stat.clone(),
            files,
            asm_files: sources.asm,
            error,
        };
        self.progress.inc_package();

        if let Some(prior) = &prior {
            if **prior == pkg {
                self.ensure_identifiers(prior, Some(prior));
                return Ok(Arc::clone(prior));
            }
        }

        let pkg = Arc::new(pkg);
        self.registry.insert(Arc::clone(&pkg));

        match prior.as_deref() {
            None => {
                tracing::debug!("package {} created ({})", pkg.import_path, pkg.name);
                self.emit(EventKind::Create, dir);
            }
            Some(prior) if content_changed(prior, &pkg) => {
                tracing::debug!("package {} updated", pkg.import_path);
                self.emit(EventKind::Update, dir);
            }
            Some(_) => {}
        }

        self.ensure_identifiers(&pkg, prior.as_deref());
        Ok(pkg)
    }

    /// Removes the package at `dir`, if any, with its identifiers.
    pub fn remove_dir(&self, dir: &Path) -> Option<Arc<Package>> {
        let removed = self.registry.delete_dir(dir);
        let had_idents = self.idents.remove_package(dir);
        if let Some(pkg) = &removed {
            tracing::debug!("package {} deleted", pkg.import_path);
            self.progress.inc_deleted();
            self.emit(EventKind::Delete, dir);
        } else if had_idents {
            tracing::trace!("dropped stale identifiers of {}", dir.display());
        }
        removed
    }

    /// Drops every package of a source root that is no longer configured.
    pub fn remove_root(&self, src_root: &Path) -> usize {
        let removed = self.registry.delete_root(src_root);
        for pkg in &removed {
            self.idents.remove_package(&pkg.dir);
            self.progress.inc_deleted();
            self.emit(EventKind::Delete, &pkg.dir);
        }
        removed.len()
    }

    fn emit(&self, kind: EventKind, dir: &Path) {
        if let Some(events) = &self.events {
            if events.send(Event::new(kind, dir)).is_err() {
                tracing::trace!("event receiver dropped");
            }
        }
    }

    /// Known files with fresh stats; files that vanished are dropped.
    fn restat_files(&self, prior: &Package) -> Sources {
        let restat = |name: &Arc<str>| {
            let path = prior.dir.join(&**name);
            match self.fs.stat(&path) {
                Ok(info) => Some((Arc::clone(name), info)),
                Err(e) => {
                    tracing::trace!("dropping {}: {}", path.display(), e);
                    None
                }
            }
        };
        Sources {
            go: prior.files.keys().filter_map(&restat).collect(),
            asm: prior.asm_files.keys().filter_map(&restat).collect(),
        }
    }

    /// Regular `.go` files of `dir`, following symlinks to files. `.S`
    /// files are collected only when C sources sit in the same directory.
    fn list_files(&self, dir: &Path, listing: Option<&[FileInfo]>) -> std::io::Result<Sources> {
        let read;
        let entries: &[FileInfo] = match listing {
            Some(entries) => entries,
            None => {
                read = self.fs.read_dir(dir)?;
                &read
            }
        };

        let mut sources = Sources::default();
        let mut has_c = false;
        for entry in entries {
            if entry.is_dir || skip_file(&entry.name) {
                continue;
            }
            has_c |= GoGrammar.is_c_interop_file(&entry.name);
            let is_asm = GoGrammar.is_asm_file(&entry.name);
            if !is_asm && !GoGrammar.is_go_file(&entry.name) {
                continue;
            }
            let info = if entry.is_symlink() {
                match self.fs.stat(&dir.join(&entry.name)) {
                    Ok(target) if !target.is_dir => target,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::trace!("dropping dangling link {}/{}: {}", dir.display(), entry.name, e);
                        continue;
                    }
                }
            } else {
                entry.clone()
            };
            let name = self.interner.intern(&entry.name);
            if is_asm {
                sources.asm.insert(name, info);
            } else {
                sources.go.push((name, info));
            }
        }
        if !has_c {
            sources.asm.clear();
        }
        Ok(sources)
    }

    fn classify(
        &self,
        pass: &UpdatePass,
        dir: &Path,
        prior: Option<&Package>,
        candidates: Vec<(Arc<str>, FileInfo)>,
    ) -> BTreeMap<Arc<str>, File> {
        candidates
            .into_iter()
            .map(|(name, stat)| {
                let class = if GoGrammar.is_test_file(&name) {
                    FileClass::TestGoFile
                } else {
                    let reused = prior
                        .filter(|_| !pass.reclassify)
                        .and_then(|p| p.files.get(&name))
                        .filter(|f| f.stat == stat)
                        .map(|f| f.class);
                    match reused {
                        Some(class) => class,
                        None if pass.env.match_file(dir, &name) => FileClass::GoFile,
                        None => FileClass::IgnoredGoFile,
                    }
                };
                let file = File {
                    name: Arc::clone(&name),
                    path: dir.join(&*name),
                    stat,
                    class,
                };
                (name, file)
            })
            .collect()
    }

    /// Declared name of the package and the structural error, if any.
    ///
    /// Buildable files are parsed in name order; the first conflicting
    /// name stops the scan. Buildable files without a parsable package
    /// clause are reclassified as ignored.
    fn resolve_name(
        &self,
        dir: &Path,
        files: &mut BTreeMap<Arc<str>, File>,
    ) -> (String, Option<PackageError>) {
        let mut first: Option<(String, Arc<str>)> = None;
        let mut error = None;
        let mut unparsable = Vec::new();

        for file in files.values().filter(|f| f.class == FileClass::GoFile) {
            let name = match self.parser.package_name(&self.fs, &file.path) {
                Ok(name) => name,
                Err(e) => {
                    tracing::trace!("no package clause in {}: {}", file.path.display(), e);
                    unparsable.push(Arc::clone(&file.name));
                    continue;
                }
            };
            match &first {
                None => first = Some((name, Arc::clone(&file.name))),
                Some((first_name, first_file)) if *first_name != name => {
                    error = Some(PackageError::MultiplePackages {
                        dir: dir.to_path_buf(),
                        names: [first_name.clone(), name],
                        files: [first_file.to_string(), file.name.to_string()],
                    });
                    break;
                }
                Some(_) => {}
            }
        }

        for name in unparsable {
            if let Some(file) = files.get_mut(&name) {
                file.class = FileClass::IgnoredGoFile;
            }
        }

        if let Some((name, _)) = first {
            return (name, error);
        }

        let fallback = files
            .values()
            .filter(|f| f.class != FileClass::GoFile)
            .find_map(|f| self.parser.package_name(&self.fs, &f.path).ok())
            .map(|name| match name.strip_suffix("_test") {
                Some(base) if !base.is_empty() => base.to_string(),
                _ => name,
            })
            .unwrap_or_default();
        let error = PackageError::NoBuildableSources {
            dir: dir.to_path_buf(),
        };
        (fallback, Some(error))
    }

    /// Re-extracts identifiers when the package is new, its buildable files
    /// or name changed, or nothing was recorded for it yet.
    fn ensure_identifiers(&self, pkg: &Package, prior: Option<&Package>) {
        if !self.index_identifiers {
            return;
        }
        if pkg.has_multiple_packages() {
            self.idents.remove_package(&pkg.dir);
            return;
        }

        let stale = match prior {
            Some(prior) => prior.name != pkg.name || pkg.go_files_changed(prior),
            None => true,
        };
        if !stale && self.idents.contains_package(&pkg.dir) {
            return;
        }

        let extracted = IdentExtractor::new(&self.interner).extract_package(&self.fs, pkg);
        tracing::trace!("{} identifiers in {}", extracted.len(), pkg.import_path);
        self.idents.replace_package(&pkg.dir, extracted);
    }
}

/// Editor and temporary files start with `.` or `_`.
fn skip_file(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_')
}

/// The prior name holds when it came from exactly the same buildable files.
fn reusable_name(prior: &Package, files: &BTreeMap<Arc<str>, File>) -> bool {
    if prior.go_files().next().is_none() {
        return false;
    }
    prior
        .go_files()
        .eq(files.values().filter(|f| f.class == FileClass::GoFile))
}

/// Changes worth a notification: files, their classes and stats, the
/// declared name, or the recorded error.
fn content_changed(prior: &Package, pkg: &Package) -> bool {
    prior.files != pkg.files
        || prior.asm_files != pkg.asm_files
        || prior.name != pkg.name
        || prior.error != pkg.error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::BuildContext;
    use crate::index::IdentKind;
    use crossbeam_channel::{unbounded, Receiver};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        goroot: PathBuf,
        src: PathBuf,
        fs: Arc<GatedFs>,
        registry: Arc<PackageRegistry>,
        idents: Arc<IdentIndex>,
        indexer: PackageIndexer,
        events: Receiver<Event>,
    }

    impl Fixture {
        fn new(identifiers: bool) -> Self {
            let temp = TempDir::new().unwrap();
            let goroot = temp.path().join("go");
            let src = goroot.join("src");
            fs::create_dir_all(&src).unwrap();

            let gfs = Arc::new(GatedFs::default());
            let registry = Arc::new(PackageRegistry::new());
            let idents = Arc::new(IdentIndex::new());
            let (tx, rx) = unbounded();
            let indexer = PackageIndexer::new(
                gfs.clone(),
                registry.clone(),
                idents.clone(),
                Arc::new(Interner::new()),
            )
            .with_events(tx)
            .with_identifiers(identifiers);

            Self {
                _temp: temp,
                goroot,
                src,
                fs: gfs,
                registry,
                idents,
                indexer,
                events: rx,
            }
        }

        fn pass(&self, tags: &[&str], reclassify: bool) -> UpdatePass {
            let ctx = BuildContext::new(&self.goroot, self.fs.clone())
                .with_platform("linux", "amd64")
                .with_build_tags(tags.iter().map(|t| t.to_string()).collect());
            UpdatePass::new(Arc::new(ctx), reclassify)
        }

        fn write(&self, rel: &str, content: &str) {
            let path = self.src.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn index(&self, pass: &UpdatePass, rel: &str) -> Result<Arc<Package>, IndexError> {
            let dir = self.src.join(rel);
            let stat = self.fs.stat(&dir).unwrap();
            self.indexer.index_dir(pass, &dir, &stat, None)
        }

        fn drain(&self) -> Vec<EventKind> {
            self.events.try_iter().map(|e| e.kind).collect()
        }
    }

    #[test]
    fn test_single_package() {
        let f = Fixture::new(false);
        f.write("a/x.go", "package a\n");

        let pkg = f.index(&f.pass(&[], false), "a").unwrap();
        assert_eq!(&*pkg.name, "a");
        assert_eq!(&*pkg.import_path, "a");
        assert_eq!(pkg.file_names(FileClass::GoFile), vec!["x.go"]);
        assert!(pkg.error.is_none());
        assert!(pkg.goroot);
        assert!(!pkg.installed);
        assert_eq!(f.drain(), vec![EventKind::Create]);
        assert!(f.registry.lookup_by_name("a").is_some());
    }

    #[test]
    fn test_test_files_are_not_name_carriers() {
        let f = Fixture::new(false);
        f.write("a/x.go", "package a\n");
        f.write("a/x_test.go", "package other_test\n");

        let pkg = f.index(&f.pass(&[], false), "a").unwrap();
        assert_eq!(&*pkg.name, "a");
        assert_eq!(pkg.file_names(FileClass::TestGoFile), vec!["x_test.go"]);
        assert!(pkg.error.is_none());
    }

    #[test]
    fn test_multiple_packages_tie_break() {
        let f = Fixture::new(false);
        f.write("m/a.go", "package p\n");
        f.write("m/b.go", "package q\n");
        f.write("m/c.go", "package p\n");

        let pkg = f.index(&f.pass(&[], false), "m").unwrap();
        assert_eq!(&*pkg.name, "p");
        assert_eq!(
            pkg.error,
            Some(PackageError::MultiplePackages {
                dir: f.src.join("m"),
                names: ["p".to_string(), "q".to_string()],
                files: ["a.go".to_string(), "b.go".to_string()],
            })
        );
    }

    #[test]
    fn test_build_tags_reclassify() {
        let f = Fixture::new(false);
        f.write("a/x.go", "package a\n");
        f.write("a/y.go", "//go:build extra\n\npackage a\n");

        let pkg = f.index(&f.pass(&[], false), "a").unwrap();
        assert_eq!(pkg.file_names(FileClass::GoFile), vec!["x.go"]);
        assert_eq!(pkg.file_names(FileClass::IgnoredGoFile), vec!["y.go"]);
        f.drain();

        let pkg = f.index(&f.pass(&["extra"], true), "a").unwrap();
        assert_eq!(pkg.file_names(FileClass::GoFile), vec!["x.go", "y.go"]);
        assert!(pkg.ignored_go_files().next().is_none());
        assert_eq!(f.drain(), vec![EventKind::Update]);
    }

    #[test]
    fn test_unchanged_directory_emits_nothing() {
        let f = Fixture::new(false);
        f.write("a/x.go", "package a\n");
        let pass = f.pass(&[], false);

        let first = f.index(&pass, "a").unwrap();
        f.drain();
        let second = f.index(&pass, "a").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(f.drain().is_empty());
    }

    #[test]
    fn test_only_test_files_fall_back() {
        let f = Fixture::new(false);
        f.write("a/a_test.go", "package a_test\n");

        let pkg = f.index(&f.pass(&[], false), "a").unwrap();
        assert_eq!(&*pkg.name, "a");
        assert_eq!(
            pkg.error,
            Some(PackageError::NoBuildableSources { dir: f.src.join("a") })
        );
        assert!(pkg.go_files().next().is_none());
    }

    #[test]
    fn test_unparsable_file_is_ignored() {
        let f = Fixture::new(false);
        f.write("a/bad.go", "this is not go\n");
        f.write("a/good.go", "package a\n");

        let pkg = f.index(&f.pass(&[], false), "a").unwrap();
        assert_eq!(&*pkg.name, "a");
        assert_eq!(pkg.class_of("bad.go"), Some(FileClass::IgnoredGoFile));
        assert_eq!(pkg.class_of("good.go"), Some(FileClass::GoFile));
    }

    #[test]
    fn test_editor_files_are_skipped() {
        let f = Fixture::new(false);
        f.write("a/x.go", "package a\n");
        f.write("a/.#x.go", "package a\n");
        f.write("a/_old.go", "package a\n");
        f.write("a/README.md", "docs\n");

        let pkg = f.index(&f.pass(&[], false), "a").unwrap();
        assert_eq!(pkg.files.len(), 1);
    }

    #[test]
    fn test_asm_tracked_only_beside_c_sources() {
        let f = Fixture::new(false);
        f.write("a/x.go", "package a\n");
        f.write("a/sys.S", "TEXT foo(SB)\n");
        f.write("a/plain.s", "TEXT bar(SB)\n");
        let pass = f.pass(&[], false);

        let pkg = f.index(&pass, "a").unwrap();
        assert!(pkg.asm_files.is_empty());
        f.drain();

        f.write("a/shim.c", "int shim(void) { return 0; }\n");
        let pkg = f.index(&pass, "a").unwrap();
        assert_eq!(pkg.asm_files.keys().map(|n| &**n).collect::<Vec<_>>(), vec!["sys.S"]);
        assert_eq!(pkg.file_names(FileClass::GoFile), vec!["x.go"]);
        assert_eq!(f.drain(), vec![EventKind::Update]);

        fs::remove_file(f.src.join("a/shim.c")).unwrap();
        let pkg = f.index(&pass, "a").unwrap();
        assert!(pkg.asm_files.is_empty());
    }

    #[test]
    fn test_asm_alone_is_not_a_package() {
        let f = Fixture::new(false);
        f.write("a/sys.S", "TEXT foo(SB)\n");
        f.write("a/shim.c", "int shim(void) { return 0; }\n");

        let err = f.index(&f.pass(&[], false), "a").unwrap_err();
        assert!(matches!(err, IndexError::NoGoFiles(_)));
    }

    #[test]
    fn test_no_go_files_removes_package() {
        let f = Fixture::new(false);
        f.write("a/x.go", "package a\n");
        let pass = f.pass(&[], false);
        f.index(&pass, "a").unwrap();
        f.drain();

        fs::remove_file(f.src.join("a/x.go")).unwrap();
        let err = f.index(&pass, "a").unwrap_err();
        assert!(matches!(err, IndexError::NoGoFiles(_)));
        assert!(f.registry.is_empty());
        assert_eq!(f.drain(), vec![EventKind::Delete]);
    }

    #[test]
    fn test_outside_source_root_is_refused() {
        let f = Fixture::new(false);
        let pass = f.pass(&[], false);
        let stat = f.fs.stat(&f.goroot).unwrap();

        let err = f.indexer.index_dir(&pass, &f.goroot, &stat, None).unwrap_err();
        assert!(matches!(err, IndexError::NotInSourceRoot(_)));

        let stat = f.fs.stat(&f.src).unwrap();
        let err = f.indexer.index_dir(&pass, &f.src, &stat, None).unwrap_err();
        assert!(matches!(err, IndexError::NotInSourceRoot(_)));
    }

    #[test]
    fn test_installed_archive() {
        let f = Fixture::new(false);
        f.write("a/x.go", "package a\n");
        let archive = f.goroot.join("pkg/linux_amd64/a.a");
        fs::create_dir_all(archive.parent().unwrap()).unwrap();
        fs::write(&archive, b"!<arch>\n").unwrap();

        let pkg = f.index(&f.pass(&[], false), "a").unwrap();
        assert!(pkg.installed);
    }

    #[test]
    fn test_identifiers_follow_package() {
        let f = Fixture::new(true);
        f.write("a/x.go", "package a\n\nfunc Run() {}\n");
        let pass = f.pass(&[], false);
        f.index(&pass, "a").unwrap();

        let found = f.idents.lookup_kind(IdentKind::Func, "Run");
        assert_eq!(found.len(), 1);
        assert_eq!(&*found[0].package_name, "a");

        f.indexer.remove_dir(&f.src.join("a"));
        assert!(f.idents.lookup("Run").is_empty());
    }

    #[test]
    fn test_identifiers_skipped_for_conflicting_package() {
        let f = Fixture::new(true);
        f.write("m/a.go", "package m\n\nfunc A() {}\n");
        f.write("m/b.go", "package n\n\nfunc B() {}\n");

        let pkg = f.index(&f.pass(&[], false), "m").unwrap();
        assert!(pkg.has_multiple_packages());
        assert!(f.idents.lookup("A").is_empty());
        assert!(!f.idents.contains_package(&f.src.join("m")));
    }
}
