//! In-memory key set cache.
//!
//! [`KeyCache`] maps a set identifier to its [`JsonWebKeySet`]. A single
//! mutex serializes every access, reads included. Callers never receive
//! references into the map: reads return copies.
//!
//! The cache knows nothing about the record store. It is filled in bulk by
//! the loader and kept current by the watcher.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::key::{JsonWebKey, JsonWebKeySet};

/// Set identifier → keys, behind one lock.
#[derive(Debug, Default)]
pub struct KeyCache {
    sets: Mutex<HashMap<String, JsonWebKeySet>>,
}

impl KeyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every cached key of `set` with identifier `kid`.
    ///
    /// `None` when the set is absent or has no such key.
    #[must_use]
    pub fn get(&self, set: &str, kid: &str) -> Option<JsonWebKeySet> {
        let sets = self.sets.lock();
        let matches: Vec<JsonWebKey> =
            sets.get(set)?.keys.iter().filter(|key| key.kid == kid).cloned().collect();
        (!matches.is_empty()).then(|| JsonWebKeySet::new(matches))
    }

    /// Returns a copy of `set`.
    ///
    /// An absent set and an empty set are both `None`.
    #[must_use]
    pub fn get_set(&self, set: &str) -> Option<JsonWebKeySet> {
        self.sets.lock().get(set).filter(|keys| !keys.is_empty()).cloned()
    }

    /// Appends `key` to `set`, creating the set if needed.
    pub fn insert(&self, set: &str, key: JsonWebKey) {
        self.with_lock(|entries| entries.insert(set, key));
    }

    /// Drops every key of `set` with identifier `kid`.
    ///
    /// Returns how many keys were dropped. Absent sets are left alone.
    pub fn remove(&self, set: &str, kid: &str) -> usize {
        self.with_lock(|entries| entries.remove(set, kid))
    }

    /// Replaces the whole content of the cache.
    pub fn replace_all(&self, sets: HashMap<String, JsonWebKeySet>) {
        *self.sets.lock() = sets;
    }

    /// Runs `f` with the lock held, so several mutations are applied as one
    /// step with respect to readers.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut CacheEntries<'_>) -> R) -> R {
        let mut sets = self.sets.lock();
        f(&mut CacheEntries { sets: &mut sets })
    }

    /// Returns the number of sets holding at least one key.
    #[must_use]
    pub fn set_count(&self) -> usize {
        self.sets.lock().values().filter(|keys| !keys.is_empty()).count()
    }

    /// Returns the total number of cached keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.sets.lock().values().map(JsonWebKeySet::len).sum()
    }
}

/// Mutable view of the cache map, only reachable through
/// [`KeyCache::with_lock`].
pub struct CacheEntries<'a> {
    sets: &'a mut HashMap<String, JsonWebKeySet>,
}

impl CacheEntries<'_> {
    /// Appends `key` to `set`, creating the set if needed.
    pub fn insert(&mut self, set: &str, key: JsonWebKey) {
        self.sets.entry(set.to_owned()).or_default().keys.push(key);
    }

    /// Drops every key of `set` with identifier `kid`, returning how many
    /// were dropped.
    pub fn remove(&mut self, set: &str, kid: &str) -> usize {
        let Some(keys) = self.sets.get_mut(set) else {
            return 0;
        };
        let before = keys.keys.len();
        keys.keys.retain(|key| key.kid != kid);
        before - keys.keys.len()
    }
}
