use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Counters for the update pass currently running (or the last one).
#[derive(Clone, Default)]
pub struct UpdateProgress {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    dirs_visited: AtomicUsize,
    packages_indexed: AtomicUsize,
    packages_deleted: AtomicUsize,
    errors: AtomicUsize,
    is_active: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    finished_at: Mutex<Option<Instant>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub is_active: bool,
    pub dirs_visited: usize,
    pub packages_indexed: usize,
    pub packages_deleted: usize,
    pub errors: usize,
    pub elapsed: Duration,
}

impl UpdateProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.inner.dirs_visited.store(0, Ordering::Release);
        self.inner.packages_indexed.store(0, Ordering::Release);
        self.inner.packages_deleted.store(0, Ordering::Release);
        self.inner.errors.store(0, Ordering::Release);
        self.inner.is_active.store(true, Ordering::Release);
        *self.inner.started_at.lock() = Some(Instant::now());
        *self.inner.finished_at.lock() = None;
    }

    pub fn inc_dir(&self) {
        self.inner.dirs_visited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_package(&self) {
        self.inner.packages_indexed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deleted(&self) {
        self.inner.packages_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// A dropped transient error (failed stat or listing).
    pub fn inc_error(&self) {
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish(&self) {
        *self.inner.finished_at.lock() = Some(Instant::now());
        self.inner.is_active.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = match (*self.inner.started_at.lock(), *self.inner.finished_at.lock()) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        };

        ProgressSnapshot {
            is_active: self.inner.is_active.load(Ordering::Acquire),
            dirs_visited: self.inner.dirs_visited.load(Ordering::Acquire),
            packages_indexed: self.inner.packages_indexed.load(Ordering::Acquire),
            packages_deleted: self.inner.packages_deleted.load(Ordering::Acquire),
            errors: self.inner.errors.load(Ordering::Acquire),
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_reset_on_start() {
        let progress = UpdateProgress::new();
        progress.start();
        progress.inc_dir();
        progress.inc_dir();
        progress.inc_package();
        progress.inc_error();
        progress.finish();

        let snap = progress.snapshot();
        assert!(!snap.is_active);
        assert_eq!(snap.dirs_visited, 2);
        assert_eq!(snap.packages_indexed, 1);
        assert_eq!(snap.errors, 1);

        progress.start();
        let snap = progress.snapshot();
        assert!(snap.is_active);
        assert_eq!(snap.dirs_visited, 0);
        assert_eq!(snap.packages_indexed, 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let progress = UpdateProgress::new();
        let other = progress.clone();
        progress.start();
        other.inc_deleted();

        assert_eq!(progress.snapshot().packages_deleted, 1);
    }

    #[test]
    fn test_idle_snapshot() {
        let snap = UpdateProgress::new().snapshot();
        assert!(!snap.is_active);
        assert_eq!(snap.elapsed, Duration::ZERO);
    }
}
