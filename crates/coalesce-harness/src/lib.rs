#![forbid(unsafe_code)]

//! Test harness for the coalesce batcher.
//!
//! Provides the scaffolding the scenario and property tests share:
//!
//! - [`SpyCallback`]: a completion callback that counts its invocations.
//! - [`FailingStore`]: a [`TargetStore`] whose writes can be made to fail.
//! - [`data_sequence`] / [`set_sequence`]: generate and submit `n`
//!   single-key patches (`{i: i}`), the usual way to feed a batch.
//! - [`strategies`]: proptest strategies for update sequences.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use coalesce_runtime::{Batcher, MemoryStore, Patch, Scheduler, TargetStore};

pub mod strategies;

// ---------------------------------------------------------------------------
// SpyCallback
// ---------------------------------------------------------------------------

/// A zero-argument callback that records how many times it ran.
///
/// Clones share the counter.
#[derive(Clone)]
pub struct SpyCallback {
    name: Rc<str>,
    calls: Rc<Cell<usize>>,
}

impl SpyCallback {
    /// Create a spy with a name used in assertion messages.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Rc::from(name.as_ref()),
            calls: Rc::new(Cell::new(0)),
        }
    }

    /// A closure that bumps this spy's counter.
    pub fn callback(&self) -> impl Fn() + 'static {
        let calls = Rc::clone(&self.calls);
        move || calls.set(calls.get() + 1)
    }

    /// Number of recorded invocations.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Whether the spy ran at least once.
    #[must_use]
    pub fn was_called(&self) -> bool {
        self.calls.get() > 0
    }

    /// Spy name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for SpyCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpyCallback")
            .field("name", &&*self.name)
            .field("calls", &self.calls.get())
            .finish()
    }
}

/// Register `count` fresh spies (`callback_0`, `callback_1`, ...) on `batcher`.
pub fn register_spies<S, Q>(batcher: &Batcher<S, Q>, count: usize) -> Vec<SpyCallback>
where
    S: TargetStore + 'static,
    Q: Scheduler + 'static,
{
    (0..count)
        .map(|i| {
            let spy = SpyCallback::new(format!("callback_{i}"));
            batcher.upon_completion(spy.callback());
            spy
        })
        .collect()
}

/// Assert every spy ran exactly `expected` times.
///
/// # Panics
///
/// On the first spy whose count differs.
pub fn assert_calls(spies: &[SpyCallback], expected: usize) {
    for spy in spies {
        assert_eq!(
            spy.calls(),
            expected,
            "{} ran {} times, expected {expected}",
            spy.name(),
            spy.calls()
        );
    }
}

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

/// `n` single-key patches: `{"0": 0}`, `{"1": 1}`, ...
#[must_use]
pub fn data_sequence(n: usize) -> Vec<Patch<String, u64>> {
    (0..n)
        .map(|i| Patch::from((i.to_string(), i as u64)))
        .collect()
}

/// Submit each patch of `seq` to `batcher`, in order.
pub fn set_sequence<S, Q, I>(batcher: &Batcher<S, Q>, seq: I)
where
    S: TargetStore + 'static,
    Q: Scheduler + 'static,
    I: IntoIterator<Item = Patch<S::Key, S::Value>>,
{
    for patch in seq {
        batcher.set_data(patch);
    }
}

// ---------------------------------------------------------------------------
// FailingStore
// ---------------------------------------------------------------------------

/// Error produced by [`FailingStore`] when a failure is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectedFailure {
    /// 1-based index of the write that failed.
    pub write: u64,
}

impl fmt::Display for InjectedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "injected failure on write #{}", self.write)
    }
}

impl std::error::Error for InjectedFailure {}

/// A [`MemoryStore`] wrapper that fails on demand.
///
/// Failed writes are counted but do not modify the data. Clones share the
/// failure switch and the underlying store.
pub struct FailingStore<K, V> {
    inner: MemoryStore<K, V>,
    fail: Rc<Cell<bool>>,
    attempts: Rc<Cell<u64>>,
}

impl<K, V> Clone for FailingStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            fail: Rc::clone(&self.fail),
            attempts: Rc::clone(&self.attempts),
        }
    }
}

impl<K: Eq + std::hash::Hash, V> FailingStore<K, V> {
    /// A store that succeeds until told otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail: Rc::new(Cell::new(false)),
            attempts: Rc::new(Cell::new(0)),
        }
    }

    /// Make subsequent writes fail (`true`) or succeed (`false`).
    pub fn set_failing(&self, failing: bool) {
        self.fail.set(failing);
    }

    /// The data written by successful writes.
    #[must_use]
    pub fn data(&self) -> &MemoryStore<K, V> {
        &self.inner
    }
}

impl<K: Eq + std::hash::Hash, V> Default for FailingStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for FailingStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailingStore")
            .field("failing", &self.fail.get())
            .field("attempts", &self.attempts.get())
            .finish()
    }
}

impl<K: Eq + std::hash::Hash, V> TargetStore for FailingStore<K, V> {
    type Key = K;
    type Value = V;
    type Error = InjectedFailure;

    fn write(&mut self, patch: Patch<K, V>) -> Result<(), InjectedFailure> {
        let write = self.attempts.get() + 1;
        self.attempts.set(write);
        if self.fail.get() {
            tracing::debug!(write, "injecting store failure");
            return Err(InjectedFailure { write });
        }
        match self.inner.write(patch) {
            Ok(()) => Ok(()),
            Err(never) => match never {},
        }
    }

    fn write_count(&self) -> u64 {
        self.attempts.get()
    }
}
