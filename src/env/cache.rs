use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::{BuildContext, EnvSnapshot, Environment, EnvironmentProvider};
use crate::error::Result;
use crate::fs::GatedFs;

/// Variables that determine the build context.
pub const ENV_VARS: &[&str] = &[
    "GOROOT",
    "GOPATH",
    "GOOS",
    "GOARCH",
    "CGO_ENABLED",
    "GOFLAGS",
    "HOME",
];

pub type VarLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Provider that samples the workspace variables at most once per interval
/// and rebuilds the [`BuildContext`] only when they changed.
///
/// Staleness is sampled, not transactional: an update may run against a
/// context that is up to one interval old.
pub struct CachedEnvironment {
    lookup: VarLookup,
    interval: Duration,
    fs: Arc<GatedFs>,
    state: RwLock<Option<CacheState>>,
}

struct CacheState {
    vars: Vec<Option<String>>,
    snapshot: EnvSnapshot,
    checked_at: Instant,
}

impl CachedEnvironment {
    /// Reads the process environment.
    pub fn from_process(fs: Arc<GatedFs>, interval: Duration) -> Self {
        Self::with_lookup(Box::new(|key: &str| std::env::var(key).ok()), fs, interval)
    }

    pub fn with_lookup(lookup: VarLookup, fs: Arc<GatedFs>, interval: Duration) -> Self {
        Self {
            lookup,
            interval,
            fs,
            state: RwLock::new(None),
        }
    }

    fn read_vars(&self) -> Vec<Option<String>> {
        ENV_VARS.iter().map(|key| (self.lookup)(key)).collect()
    }

    fn outdated(&self) -> bool {
        match &*self.state.read() {
            Some(state) => state.checked_at.elapsed() >= self.interval,
            None => true,
        }
    }
}

impl EnvironmentProvider for CachedEnvironment {
    fn acquire(&self) -> Result<EnvSnapshot> {
        if !self.outdated() {
            if let Some(state) = &*self.state.read() {
                return Ok(state.snapshot.clone());
            }
        }

        let vars = self.read_vars();
        let mut state = self.state.write();
        let generation = match &mut *state {
            Some(current) if current.vars == vars => {
                current.checked_at = Instant::now();
                return Ok(current.snapshot.clone());
            }
            Some(current) => current.snapshot.generation + 1,
            None => 1,
        };

        let lookup = |key: &str| {
            ENV_VARS
                .iter()
                .position(|k| *k == key)
                .and_then(|i| vars[i].clone())
        };
        let context = BuildContext::from_vars(&lookup, Arc::clone(&self.fs))?;
        tracing::debug!(
            "environment recomputed (generation {}): GOROOT={} GOOS={} GOARCH={}",
            generation,
            context.goroot().display(),
            context.os(),
            context.arch(),
        );

        let snapshot = EnvSnapshot {
            env: Arc::new(context),
            generation,
        };
        *state = Some(CacheState {
            vars,
            snapshot: snapshot.clone(),
            checked_at: Instant::now(),
        });
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    type SharedVars = Arc<parking_lot::Mutex<HashMap<String, String>>>;

    fn provider(vars: &SharedVars, interval: Duration) -> CachedEnvironment {
        let vars = Arc::clone(vars);
        CachedEnvironment::with_lookup(
            Box::new(move |key: &str| vars.lock().get(key).cloned()),
            Arc::new(GatedFs::default()),
            interval,
        )
    }

    fn shared(pairs: &[(&str, &str)]) -> SharedVars {
        Arc::new(parking_lot::Mutex::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }

    #[test]
    fn test_unchanged_vars_keep_generation() {
        let vars = shared(&[("GOROOT", "/opt/go"), ("GOPATH", "/gp")]);
        let env = provider(&vars, Duration::ZERO);

        let a = env.acquire().unwrap();
        let b = env.acquire().unwrap();
        assert_eq!(a.generation, b.generation);
        assert!(Arc::ptr_eq(&a.env, &b.env));
    }

    #[test]
    fn test_changed_vars_recompute() {
        let vars = shared(&[("GOROOT", "/opt/go"), ("GOPATH", "/gp1")]);
        let env = provider(&vars, Duration::ZERO);
        let before = env.acquire().unwrap();

        vars.lock().insert("GOPATH".into(), "/gp2".into());
        let after = env.acquire().unwrap();

        assert_eq!(after.generation, before.generation + 1);
        assert_eq!(
            after.env.source_roots(),
            vec![PathBuf::from("/opt/go/src"), PathBuf::from("/gp2/src")]
        );
    }

    #[test]
    fn test_interval_defers_recompute() {
        let vars = shared(&[("GOROOT", "/opt/go"), ("GOPATH", "/gp1")]);
        let env = provider(&vars, Duration::from_secs(3600));
        let before = env.acquire().unwrap();

        vars.lock().insert("GOPATH".into(), "/gp2".into());
        let after = env.acquire().unwrap();

        assert_eq!(after.generation, before.generation);
        assert_eq!(after.env.source_roots(), before.env.source_roots());
    }

    #[test]
    fn test_invalid_environment_is_error() {
        let vars = shared(&[("GOROOT", "not/absolute")]);
        let env = provider(&vars, Duration::ZERO);
        assert!(env.acquire().is_err());
    }
}
