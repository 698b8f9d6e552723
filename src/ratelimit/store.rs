//! Concurrent per-key state storage.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

/// A concurrent map from key to limiter state.
///
/// State is created lazily on first use, at most once per key even when many
/// threads race on the same new key. Entries are never evicted on their own;
/// distinct keys accumulate until `remove` or `clear` is called.
pub struct KeyedStore<S> {
    entries: DashMap<String, Arc<S>>,
}

impl<S> KeyedStore<S> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Get the state for `key`, creating it with `init` if absent.
    pub fn get_or_insert_with(&self, key: &str, init: impl FnOnce() -> S) -> Arc<S> {
        if let Some(state) = self.entries.get(key) {
            return Arc::clone(state.value());
        }

        let state = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| {
                debug!(key = %key, "Creating key state");
                Arc::new(init())
            });
        Arc::clone(state.value())
    }

    /// Get the state for `key` without creating it.
    pub fn get(&self, key: &str) -> Option<Arc<S>> {
        self.entries.get(key).map(|state| Arc::clone(state.value()))
    }

    /// Drop the state for `key`. Returns `true` if it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every key's state.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold a value over every key's state.
    pub fn fold<T>(&self, init: T, mut f: impl FnMut(T, &S) -> T) -> T {
        self.entries
            .iter()
            .fold(init, |acc, entry| f(acc, entry.value().as_ref()))
    }
}

impl<S> Default for KeyedStore<S> {
    fn default() -> Self {
        Self::new()
    }
}
