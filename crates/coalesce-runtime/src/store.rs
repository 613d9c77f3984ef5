#![forbid(unsafe_code)]

//! The write target a [`Batcher`](crate::Batcher) flushes into.
//!
//! The batcher needs exactly two things from a store: one mutating write that
//! applies a merged [`Patch`], and a counter of how many writes happened. The
//! counter exists so callers can verify batching (one write per flush, never
//! one per `set_data`).
//!
//! [`MemoryStore`] is a shared in-memory implementation. Clones share state,
//! so a test or demo can keep a handle while the batcher owns another.

use std::cell::RefCell;
use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use ahash::AHashMap;

use crate::patch::Patch;

/// A mutable store that accepts merged patches.
pub trait TargetStore {
    /// Key type of the patches this store accepts.
    type Key: Eq + Hash;
    /// Value type of the patches this store accepts.
    type Value;
    /// Failure reported by [`write`](Self::write).
    type Error: std::error::Error + 'static;

    /// Apply `patch` with shallow-merge semantics: existing keys are
    /// overwritten, new keys are added.
    ///
    /// Implementations must count every call, successful or not, toward
    /// [`write_count`](Self::write_count).
    fn write(&mut self, patch: Patch<Self::Key, Self::Value>) -> Result<(), Self::Error>;

    /// Number of times [`write`](Self::write) has been invoked.
    fn write_count(&self) -> u64;
}

struct MemoryInner<K, V> {
    data: AHashMap<K, V>,
    writes: u64,
}

/// In-memory [`TargetStore`] with shared, cloneable state.
pub struct MemoryStore<K, V> {
    inner: Rc<RefCell<MemoryInner<K, V>>>,
}

impl<K, V> Clone for MemoryStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K: Eq + Hash, V> MemoryStore<K, V> {
    /// Create an empty store with a zero write counter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemoryInner {
                data: AHashMap::new(),
                writes: 0,
            })),
        }
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().data.len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().data.is_empty()
    }
}

impl<K: Eq + Hash, V: Clone> MemoryStore<K, V> {
    /// Clone the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.borrow().data.get(key).cloned()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> MemoryStore<K, V> {
    /// Copy the full contents into a [`Patch`].
    #[must_use]
    pub fn snapshot(&self) -> Patch<K, V> {
        self.inner
            .borrow()
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K: Eq + Hash, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for MemoryStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MemoryStore")
            .field("len", &inner.data.len())
            .field("writes", &inner.writes)
            .finish()
    }
}

impl<K: Eq + Hash, V> TargetStore for MemoryStore<K, V> {
    type Key = K;
    type Value = V;
    type Error = Infallible;

    fn write(&mut self, patch: Patch<K, V>) -> Result<(), Infallible> {
        let mut inner = self.inner.borrow_mut();
        inner.writes += 1;
        inner.data.extend(patch);
        Ok(())
    }

    fn write_count(&self) -> u64 {
        self.inner.borrow().writes
    }
}
