use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::constraint::{good_os_arch_file, Header, UNIX_OS};
use super::Environment;
use crate::error::{CorpusError, Result};
use crate::fs::GatedFs;
use crate::indexer::parser::Parser;
use crate::languages::GoGrammar;

/// Newest Go 1.x minor release whose `go1.N` tag is satisfied.
pub const LATEST_GO_MINOR: u32 = 23;

pub const DEFAULT_GOROOT: &str = "/usr/local/go";

/// The Go toolchain's view of a workspace: roots, target platform and tags.
#[derive(Debug)]
pub struct BuildContext {
    goroot: PathBuf,
    gopath: Vec<PathBuf>,
    goos: String,
    goarch: String,
    compiler: String,
    build_tags: Vec<String>,
    release_tags: Vec<String>,
    cgo_enabled: bool,
    fs: Arc<GatedFs>,
}

impl BuildContext {
    /// A context for the host platform with no GOPATH entries.
    pub fn new(goroot: impl Into<PathBuf>, fs: Arc<GatedFs>) -> Self {
        Self {
            goroot: goroot.into(),
            gopath: Vec::new(),
            goos: host_os().to_string(),
            goarch: host_arch().to_string(),
            compiler: "gc".to_string(),
            build_tags: Vec::new(),
            release_tags: (1..=LATEST_GO_MINOR).map(|n| format!("go1.{}", n)).collect(),
            cgo_enabled: true,
            fs,
        }
    }

    pub fn with_gopath(mut self, gopath: Vec<PathBuf>) -> Self {
        self.gopath = gopath;
        self
    }

    pub fn with_platform(mut self, goos: impl Into<String>, goarch: impl Into<String>) -> Self {
        self.goos = goos.into();
        self.goarch = goarch.into();
        self
    }

    pub fn with_build_tags(mut self, tags: Vec<String>) -> Self {
        self.build_tags = tags;
        self
    }

    pub fn with_cgo(mut self, enabled: bool) -> Self {
        self.cgo_enabled = enabled;
        self
    }

    /// Builds a context from Go's environment variables, resolved through
    /// `lookup` (normally `std::env::var`).
    pub fn from_vars(lookup: &dyn Fn(&str) -> Option<String>, fs: Arc<GatedFs>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let goroot = PathBuf::from(non_empty("GOROOT").unwrap_or_else(|| DEFAULT_GOROOT.to_string()));
        if !goroot.is_absolute() {
            return Err(CorpusError::Environment(format!(
                "GOROOT must be an absolute path, got {}",
                goroot.display()
            )));
        }

        let gopath: Vec<PathBuf> = match non_empty("GOPATH") {
            Some(list) => std::env::split_paths(&list)
                .filter(|p| p.is_absolute() && *p != goroot)
                .collect(),
            None => non_empty("HOME")
                .map(|home| vec![PathBuf::from(home).join("go")])
                .unwrap_or_default(),
        };

        let goos = non_empty("GOOS").unwrap_or_else(|| host_os().to_string());
        let goarch = non_empty("GOARCH").unwrap_or_else(|| host_arch().to_string());
        let cgo_enabled = match non_empty("CGO_ENABLED").as_deref() {
            Some("1") => true,
            Some("0") => false,
            Some(other) => {
                return Err(CorpusError::Environment(format!(
                    "invalid CGO_ENABLED value {:?}",
                    other
                )))
            }
            None => goos == host_os() && goarch == host_arch(),
        };
        let build_tags = non_empty("GOFLAGS")
            .map(|flags| tags_from_goflags(&flags))
            .unwrap_or_default();

        Ok(Self::new(goroot, fs)
            .with_gopath(gopath)
            .with_platform(goos, goarch)
            .with_build_tags(build_tags)
            .with_cgo(cgo_enabled))
    }

    pub fn goroot(&self) -> &Path {
        &self.goroot
    }

    pub fn gopath(&self) -> &[PathBuf] {
        &self.gopath
    }

    /// Whether a single build tag is satisfied.
    pub fn match_tag(&self, tag: &str) -> bool {
        if tag.is_empty() {
            return false;
        }
        if tag == self.goos || tag == self.goarch || tag == self.compiler {
            return true;
        }
        let implied = match self.goos.as_str() {
            "android" => "linux",
            "illumos" => "solaris",
            "ios" => "darwin",
            _ => "",
        };
        if tag == implied {
            return true;
        }
        if tag == "unix" && UNIX_OS.contains(&self.goos.as_str()) {
            return true;
        }
        if tag == "cgo" {
            return self.cgo_enabled;
        }
        self.build_tags.iter().any(|t| t == tag) || self.release_tags.iter().any(|t| t == tag)
    }

    fn imports_cgo(&self, source: Vec<u8>) -> bool {
        Parser::new()
            .parse_source(source)
            .map(|parsed| parsed.imports().iter().any(|p| p == "C"))
            .unwrap_or(false)
    }
}

impl Environment for BuildContext {
    fn source_roots(&self) -> Vec<PathBuf> {
        std::iter::once(&self.goroot)
            .chain(self.gopath.iter())
            .map(|root| root.join("src"))
            .collect()
    }

    fn standard_tree_root(&self) -> PathBuf {
        self.goroot.join("src")
    }

    fn os(&self) -> &str {
        &self.goos
    }

    fn arch(&self) -> &str {
        &self.goarch
    }

    fn build_tags(&self) -> &[String] {
        &self.build_tags
    }

    fn cgo_enabled(&self) -> bool {
        self.cgo_enabled
    }

    fn match_file(&self, dir: &Path, name: &str) -> bool {
        if name.starts_with('_') || name.starts_with('.') || !GoGrammar.is_go_file(name) {
            return false;
        }
        if !good_os_arch_file(name, |tag| self.match_tag(tag)) {
            return false;
        }

        let source = match self.fs.read_file(&dir.join(name)) {
            Ok(source) => source,
            Err(e) => {
                tracing::trace!("match_file {}/{}: {}", dir.display(), name, e);
                return false;
            }
        };
        if !Header::scan(&source).matches(&|tag| self.match_tag(tag)) {
            return false;
        }
        if !self.cgo_enabled && self.imports_cgo(source) {
            return false;
        }
        true
    }

    fn target_path(
        &self,
        src_root: &Path,
        import_path: &str,
        is_command: bool,
    ) -> Option<(PathBuf, PathBuf)> {
        let root = src_root.parent()?.to_path_buf();
        let platform = format!("{}_{}", self.goos, self.goarch);

        let rel = if is_command {
            let base = import_path.rsplit('/').next()?;
            let exe = if self.goos == "windows" {
                format!("{}.exe", base)
            } else {
                base.to_string()
            };
            let is_tool = src_root == self.standard_tree_root()
                && import_path.starts_with("cmd/")
                && import_path != "cmd/go"
                && import_path != "cmd/gofmt";
            if is_tool {
                Path::new("pkg").join("tool").join(platform).join(exe)
            } else {
                Path::new("bin").join(exe)
            }
        } else {
            Path::new("pkg")
                .join(platform)
                .join(format!("{}.a", import_path))
        };
        Some((root, rel))
    }
}

fn tags_from_goflags(flags: &str) -> Vec<String> {
    flags
        .split_whitespace()
        .filter_map(|flag| {
            flag.strip_prefix("-tags=")
                .or_else(|| flag.strip_prefix("--tags="))
        })
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "loongarch64" => "loong64",
        "powerpc64" => "ppc64",
        "wasm32" => "wasm",
        other => other,
    }
}
