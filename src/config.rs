//! Corpus configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.
//! The integer limits follow one convention: `0` selects the default and a
//! negative value disables the limit.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CorpusError, Result};

pub const DEFAULT_MAX_OPEN_FILES: usize = 200;
pub const DEFAULT_MAX_OPEN_DIRS: usize = 50;
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of concurrently open files
    pub max_open_files: i64,
    /// Maximum number of concurrently open directories
    pub max_open_dirs: i64,
    /// Maximum directory depth below a source root (<= 0 means unbounded)
    pub max_depth: i64,
    /// Build the identifier index for every package
    pub index_identifiers: bool,
    /// Emit create/update/delete events
    pub log_events: bool,
    /// How often the environment re-reads its variables (milliseconds in TOML)
    #[serde(with = "duration_ms")]
    pub update_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_open_files: 0,
            max_open_dirs: 0,
            max_depth: 0,
            index_identifiers: false,
            log_events: false,
            update_interval: DEFAULT_UPDATE_INTERVAL,
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CorpusError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn with_identifiers(mut self, enabled: bool) -> Self {
        self.index_identifiers = enabled;
        self
    }

    pub fn with_events(mut self, enabled: bool) -> Self {
        self.log_events = enabled;
        self
    }

    pub fn with_max_depth(mut self, depth: i64) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Effective open-file limit; `None` means ungated.
    pub fn open_files_limit(&self) -> Option<usize> {
        normalize_limit(self.max_open_files, DEFAULT_MAX_OPEN_FILES)
    }

    /// Effective open-directory limit; `None` means ungated.
    pub fn open_dirs_limit(&self) -> Option<usize> {
        normalize_limit(self.max_open_dirs, DEFAULT_MAX_OPEN_DIRS)
    }

    pub fn depth_limit(&self) -> usize {
        if self.max_depth <= 0 {
            usize::MAX
        } else {
            self.max_depth as usize
        }
    }
}

pub(crate) fn normalize_limit(value: i64, default: usize) -> Option<usize> {
    match value {
        v if v < 0 => None,
        0 => Some(default),
        v => Some(v as usize),
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.open_files_limit(), Some(DEFAULT_MAX_OPEN_FILES));
        assert_eq!(config.open_dirs_limit(), Some(DEFAULT_MAX_OPEN_DIRS));
        assert_eq!(config.depth_limit(), usize::MAX);
    }

    #[test]
    fn test_toml_overrides() {
        let config = Config::from_toml_str(
            r#"
max_open_files = -1
max_open_dirs = 8
max_depth = 3
index_identifiers = true
log_events = true
update_interval = 250
"#,
        )
        .unwrap();

        assert_eq!(config.open_files_limit(), None);
        assert_eq!(config.open_dirs_limit(), Some(8));
        assert_eq!(config.depth_limit(), 3);
        assert!(config.index_identifiers);
        assert!(config.log_events);
        assert_eq!(config.update_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml_str("max_depth = \"deep\"").unwrap_err();
        assert!(matches!(err, CorpusError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("corpus.toml");
        std::fs::write(&path, "log_events = true\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(config.log_events);
        assert!(!config.index_identifiers);
    }
}
