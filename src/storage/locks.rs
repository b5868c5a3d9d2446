//! Per-key mutual exclusion.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crate::storage::StorageError;

/// A set of mutexes addressed by key.
///
/// Used to serialize read-check-write sequences that must be atomic per
/// key, such as adding a position under a hypothesis issue or merging
/// extraction output into one problem. Entries are dropped once no caller
/// holds or waits on them.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `key`.
    ///
    /// # Errors
    /// Returns a storage backend error if a lock was poisoned, otherwise
    /// whatever `f` returns.
    pub fn with_lock<T, E>(&self, key: &K, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| lock_err("keyed.acquire"))?;
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = slot.lock().map_err(|_| lock_err("keyed.hold"))?;
            f()
        };

        let mut slots = self.slots.lock().map_err(|_| lock_err("keyed.release"))?;
        // The map and this call hold the only references: nobody is waiting.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
        result
    }

    /// Number of keys with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// True when no key is locked or awaited.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}
