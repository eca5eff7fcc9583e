use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Keyed mutual-exclusion registry: at most one holder per conversation id.
///
/// Cloning shares the registry. Inject the same instance into every service that
/// must observe the same single-flight guarantee.
#[derive(Clone, Default)]
pub struct ImportLocks {
    held: Arc<Mutex<HashSet<i64>>>,
}

/// Held lock for one key; dropping it releases the key.
#[derive(Debug)]
pub struct ImportLockGuard {
    key: i64,
    held: Arc<Mutex<HashSet<i64>>>,
}

impl ImportLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `key` without waiting. `None` if it is already held.
    pub fn try_acquire(&self, key: i64) -> Option<ImportLockGuard> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(key) {
            return None;
        }
        trace!("Acquired import lock for conversation {}", key);
        Some(ImportLockGuard {
            key,
            held: self.held.clone(),
        })
    }

    pub fn is_held(&self, key: i64) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&key)
    }
}

impl ImportLockGuard {
    pub fn key(&self) -> i64 {
        self.key
    }
}

impl Drop for ImportLockGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
        trace!("Released import lock for conversation {}", self.key);
    }
}
