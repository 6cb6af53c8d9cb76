//! Counting semaphore built on a bounded channel.
//!
//! Acquiring sends a token into the channel (blocking while it is full);
//! dropping the permit takes one back out. The channel is created on first
//! use so an unused gate costs nothing.

use crossbeam_channel::{bounded, Receiver, Sender};
use once_cell::sync::OnceCell;

#[derive(Debug)]
pub struct Gate {
    limit: Option<usize>,
    tokens: OnceCell<(Sender<()>, Receiver<()>)>,
}

/// Held while a gated resource is open.
pub struct Permit<'a> {
    gate: Option<&'a Gate>,
}

impl Gate {
    /// `None` disables gating entirely.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit: limit.map(|l| l.max(1)),
            tokens: OnceCell::new(),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn acquire(&self) -> Permit<'_> {
        let Some(limit) = self.limit else {
            return Permit { gate: None };
        };
        let (tx, _) = self.tokens.get_or_init(|| bounded(limit));
        // Both ends live in `self`, so the channel cannot disconnect here.
        let _ = tx.send(());
        Permit { gate: Some(self) }
    }

    /// Number of permits currently held.
    pub fn in_use(&self) -> usize {
        self.tokens.get().map(|(tx, _)| tx.len()).unwrap_or(0)
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Some((_, rx)) = self.gate.and_then(|g| g.tokens.get()) {
            let _ = rx.try_recv();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_ungated_never_blocks() {
        let gate = Gate::new(None);
        let permits: Vec<_> = (0..1000).map(|_| gate.acquire()).collect();
        assert_eq!(permits.len(), 1000);
        assert_eq!(gate.in_use(), 0);
    }

    #[test]
    fn test_permits_are_released_on_drop() {
        let gate = Gate::new(Some(2));
        {
            let _a = gate.acquire();
            let _b = gate.acquire();
            assert_eq!(gate.in_use(), 2);
        }
        assert_eq!(gate.in_use(), 0);
    }

    #[test]
    fn test_limit_bounds_concurrency() {
        let gate = Arc::new(Gate::new(Some(3)));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _permit = gate.acquire();
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    current.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.in_use(), 0);
    }

    #[test]
    fn test_zero_limit_is_raised_to_one() {
        let gate = Gate::new(Some(0));
        assert_eq!(gate.limit(), Some(1));
        let _permit = gate.acquire();
        assert_eq!(gate.in_use(), 1);
    }
}
