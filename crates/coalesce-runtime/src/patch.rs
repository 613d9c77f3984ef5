#![forbid(unsafe_code)]

//! Key/value patches with shallow, last-write-wins merge semantics.
//!
//! A [`Patch`] is the unit of data flowing through the batcher: callers hand
//! one to [`Batcher::set_data`](crate::Batcher::set_data), the batcher merges
//! it into the pending patch, and the merged result is what the store sees.
//!
//! # Invariants
//!
//! 1. Merging is shallow: a key's value is replaced wholesale, never combined.
//! 2. For a key present in several merged patches, the value from the most
//!    recently merged patch survives.
//! 3. An empty patch denotes "nothing pending".

use std::fmt;
use std::hash::Hash;

use ahash::AHashMap;

/// A mapping from keys to values, merged shallowly with last-write-wins.
#[derive(Clone)]
pub struct Patch<K, V> {
    entries: AHashMap<K, V>,
}

impl<K: Eq + Hash, V> Patch<K, V> {
    /// Create an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: AHashMap::new(),
        }
    }

    /// Create an empty patch with room for `capacity` keys.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: AHashMap::with_capacity(capacity),
        }
    }

    /// Set a single key, returning the value it replaced.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Merge `other` into `self`. Keys in `other` overwrite keys in `self`.
    pub fn merge(&mut self, other: Patch<K, V>) {
        if self.entries.is_empty() {
            self.entries = other.entries;
            return;
        }
        self.entries.extend(other.entries);
    }

    /// Look up the value for `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the patch holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }
}

impl<K: Eq + Hash, V> Default for Patch<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V: PartialEq> PartialEq for Patch<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K: Eq + Hash, V: Eq> Eq for Patch<K, V> {}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Patch<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for Patch<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<K: Eq + Hash, V, const N: usize> From<[(K, V); N]> for Patch<K, V> {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl<K: Eq + Hash, V> From<(K, V)> for Patch<K, V> {
    fn from((key, value): (K, V)) -> Self {
        let mut patch = Self::with_capacity(1);
        patch.insert(key, value);
        patch
    }
}

impl<K: Eq + Hash, V> IntoIterator for Patch<K, V> {
    type Item = (K, V);
    type IntoIter = std::collections::hash_map::IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Eq + Hash, V> Extend<(K, V)> for Patch<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}
