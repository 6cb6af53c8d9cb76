use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

/// Shares storage between equal strings (import paths, file and identifier
/// names). Safe to use from many threads.
#[derive(Default)]
pub struct Interner {
    strings: RwLock<HashSet<Arc<str>>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.read().get(s) {
            return Arc::clone(existing);
        }
        let mut strings = self.strings.write();
        // Another writer may have won the race between the two locks.
        if let Some(existing) = strings.get(s) {
            return Arc::clone(existing);
        }
        let interned: Arc<str> = Arc::from(s);
        strings.insert(Arc::clone(&interned));
        interned
    }

    pub fn len(&self) -> usize {
        self.strings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
