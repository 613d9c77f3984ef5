#![forbid(unsafe_code)]

//! Write-coalescing batcher.
//!
//! A [`Batcher`] buffers many small [`set_data`](Batcher::set_data) calls
//! into one pending [`Patch`] and writes it to its [`TargetStore`] once per
//! batch. The write happens either on a later scheduler turn (the deferred
//! flush armed by the first `set_data` of the batch) or earlier, when a
//! caller invokes [`flush`](Batcher::flush) directly. Both paths share the
//! same logic, so whichever runs second finds nothing to do.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --set_data--> Accumulating (deferred flush armed)
//!   ^                      |
//!   +------ flush ---------+   (manual or deferred, whichever comes first)
//! ```
//!
//! # Invariants
//!
//! 1. `set_data` never writes to the store.
//! 2. At most one deferred flush is armed per batch.
//! 3. A non-empty flush performs exactly one store write and reports the
//!    number of `set_data` calls it absorbed.
//! 4. The pending batch is reset exactly once per flush, before the store
//!    write, so a failed or panicking write never re-flushes stale data.
//! 5. Completion callbacks fire once per successful write, in registration
//!    order, and never for empty or failed flushes.
//!
//! # Reentrancy
//!
//! Callbacks run after the batch has been reset. A callback that calls
//! `set_data` starts a fresh batch with its own deferred flush. A callback
//! (or store) that calls `flush` gets [`FlushError::Reentrant`] and the fresh
//! batch stays pending. Callbacks registered from inside a callback take
//! effect from the next flush.
//!
//! # Failure Modes
//!
//! - Store error: returned from manual `flush` as [`FlushError::Store`];
//!   logged with `tracing::warn!` on the deferred path.
//! - Callback panic: unwinds through `flush`; the batcher stays consistent.
//! - All handles dropped before the deferred flush runs: the task finds no
//!   batcher and does nothing; the pending batch is discarded.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::Hash;
use std::mem;
use std::rc::{Rc, Weak};

use web_time::Instant;

use crate::config::BatcherConfig;
use crate::error::FlushError;
use crate::patch::Patch;
use crate::scheduler::{Scheduler, TaskQueue};
use crate::store::TargetStore;

/// Counters describing a batcher's history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Successful store writes.
    pub flushes: u64,
    /// `set_data` calls absorbed by successful writes.
    pub operations: u64,
    /// `flush` calls that found nothing to write.
    pub empty_flushes: u64,
    /// Successful writes triggered by the scheduler.
    pub deferred_flushes: u64,
    /// Successful writes triggered by a caller.
    pub manual_flushes: u64,
    /// Store writes that returned an error.
    pub failed_writes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Manual,
    Deferred,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Deferred => "deferred",
        }
    }
}

struct Pending<K, V> {
    patch: Patch<K, V>,
    operations: usize,
    scheduled: bool,
    opened_at: Option<Instant>,
}

impl<K: Eq + Hash, V> Pending<K, V> {
    fn new() -> Self {
        Self {
            patch: Patch::new(),
            operations: 0,
            scheduled: false,
            opened_at: None,
        }
    }
}

type Callback = Rc<dyn Fn()>;

struct Shared<S: TargetStore, Q> {
    store: RefCell<S>,
    scheduler: Q,
    config: BatcherConfig,
    pending: RefCell<Pending<S::Key, S::Value>>,
    callbacks: RefCell<Vec<Callback>>,
    generation: Cell<u64>,
    flushing: Cell<bool>,
    stats: Cell<BatcherStats>,
}

/// Clears the in-flush flag even when the store or a callback panics.
struct FlushGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> FlushGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self { flag }
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

impl<S, Q> Shared<S, Q>
where
    S: TargetStore + 'static,
    Q: Scheduler + 'static,
{
    fn update_stats(&self, f: impl FnOnce(&mut BatcherStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    /// Detach the pending batch, re-arming the batcher. `None` when idle.
    fn close_batch(&self) -> Option<Pending<S::Key, S::Value>> {
        let mut pending = self.pending.borrow_mut();
        if pending.operations == 0 {
            return None;
        }
        self.generation.set(self.generation.get() + 1);
        Some(mem::replace(&mut *pending, Pending::new()))
    }

    fn flush(&self, trigger: Trigger) -> Result<usize, FlushError<S::Error>> {
        if self.flushing.get() {
            return Err(FlushError::Reentrant);
        }

        let _span = tracing::debug_span!(
            "batcher.flush",
            label = %self.config.label,
            generation = self.generation.get(),
            trigger = trigger.as_str()
        )
        .entered();

        let batch = match self.close_batch() {
            Some(batch) if !batch.patch.is_empty() => batch,
            _ => {
                self.update_stats(|s| s.empty_flushes += 1);
                return Ok(0);
            }
        };
        let _guard = FlushGuard::enter(&self.flushing);

        let operations = batch.operations;
        let keys = batch.patch.len();
        let written = self.store.borrow_mut().write(batch.patch);
        if let Err(err) = written {
            self.update_stats(|s| s.failed_writes += 1);
            return Err(FlushError::Store(err));
        }

        self.update_stats(|s| {
            s.flushes += 1;
            s.operations += operations as u64;
            match trigger {
                Trigger::Manual => s.manual_flushes += 1,
                Trigger::Deferred => s.deferred_flushes += 1,
            }
        });
        tracing::debug!(
            operations,
            keys,
            age_us = batch
                .opened_at
                .map_or(0, |t| t.elapsed().as_micros() as u64),
            "flushed batch"
        );

        // Snapshot so callbacks may register more callbacks.
        let callbacks: Vec<Callback> = self.callbacks.borrow().clone();
        for callback in &callbacks {
            callback();
        }

        Ok(operations)
    }
}

/// Coalesces `set_data` calls into one store write per batch.
///
/// `Batcher` is a shared handle: clones refer to the same pending batch,
/// store, and callback registry. It is single-threaded (`!Send`).
///
/// # Example
///
/// ```
/// use coalesce_runtime::{Batcher, MemoryStore, Patch, TaskQueue, TargetStore};
///
/// let store: MemoryStore<&str, i32> = MemoryStore::new();
/// let queue = TaskQueue::new();
/// let batcher = Batcher::new(store.clone(), queue.clone());
///
/// batcher.set_data([("a", 1)]);
/// batcher.set_data([("b", 2)]);
/// batcher.set_data([("a", 3)]);
/// assert_eq!(store.write_count(), 0);
///
/// assert_eq!(batcher.flush(), Ok(3));
/// assert_eq!(store.snapshot(), Patch::from([("a", 3), ("b", 2)]));
/// assert_eq!(store.write_count(), 1);
///
/// // The deferred flush finds nothing left to write.
/// queue.run_until_idle().unwrap();
/// assert_eq!(store.write_count(), 1);
/// ```
pub struct Batcher<S: TargetStore, Q = TaskQueue> {
    shared: Rc<Shared<S, Q>>,
}

impl<S: TargetStore, Q> Clone for Batcher<S, Q> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<S, Q> Batcher<S, Q>
where
    S: TargetStore + 'static,
    Q: Scheduler + 'static,
{
    /// Create a batcher writing into `store` and deferring flushes to
    /// `scheduler`, with the default configuration.
    #[must_use]
    pub fn new(store: S, scheduler: Q) -> Self {
        Self::with_config(store, scheduler, BatcherConfig::default())
    }

    /// Create a batcher with an explicit configuration.
    #[must_use]
    pub fn with_config(store: S, scheduler: Q, config: BatcherConfig) -> Self {
        Self {
            shared: Rc::new(Shared {
                store: RefCell::new(store),
                scheduler,
                config,
                pending: RefCell::new(Pending::new()),
                callbacks: RefCell::new(Vec::new()),
                generation: Cell::new(0),
                flushing: Cell::new(false),
                stats: Cell::new(BatcherStats::default()),
            }),
        }
    }

    /// Merge `partial` into the pending batch.
    ///
    /// Keys already pending are overwritten. The first call of a batch arms
    /// one deferred flush (unless auto-flush is disabled). Never writes to
    /// the store.
    pub fn set_data(&self, partial: impl Into<Patch<S::Key, S::Value>>) {
        let arm = {
            let mut pending = self.shared.pending.borrow_mut();
            pending.patch.merge(partial.into());
            pending.operations += 1;
            if pending.opened_at.is_none() {
                pending.opened_at = Some(Instant::now());
            }
            let arm = self.shared.config.auto_flush && !pending.scheduled;
            if arm {
                pending.scheduled = true;
            }
            arm
        };

        if arm {
            self.arm_deferred_flush();
        }
    }

    /// Set a single key. Shorthand for `set_data((key, value))`.
    pub fn set(&self, key: S::Key, value: S::Value) {
        self.set_data((key, value));
    }

    /// Write the pending batch to the store and notify completion callbacks.
    ///
    /// Returns the number of `set_data` calls in the flushed batch, or `0`
    /// when nothing was pending (no write, no callbacks).
    ///
    /// # Errors
    ///
    /// - [`FlushError::Store`] if the store write fails. The batch is
    ///   discarded and callbacks are not invoked.
    /// - [`FlushError::Reentrant`] if called while this batcher is flushing.
    pub fn flush(&self) -> Result<usize, FlushError<S::Error>> {
        self.shared.flush(Trigger::Manual)
    }

    /// Register `callback` to run after every successful flush.
    ///
    /// Registrations are permanent and may repeat; each registration fires
    /// once per flush, in registration order.
    pub fn upon_completion(&self, callback: impl Fn() + 'static) {
        self.shared.callbacks.borrow_mut().push(Rc::new(callback));
    }

    fn arm_deferred_flush(&self) {
        let armed_for = self.shared.generation.get();
        let weak: Weak<Shared<S, Q>> = Rc::downgrade(&self.shared);
        tracing::trace!(
            label = %self.shared.config.label,
            generation = armed_for,
            "armed deferred flush"
        );

        self.shared.scheduler.defer(Box::new(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.generation.get() != armed_for {
                // Batch already flushed manually; a newer task owns the next one.
                tracing::trace!(
                    label = %shared.config.label,
                    armed_for,
                    "skipping stale deferred flush"
                );
                return;
            }
            if let Err(err) = shared.flush(Trigger::Deferred) {
                tracing::warn!(
                    label = %shared.config.label,
                    error = %err,
                    "deferred flush failed"
                );
            }
        }));
    }
}

impl<S: TargetStore, Q> Batcher<S, Q> {
    /// Number of `set_data` calls in the pending batch.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.shared.pending.borrow().operations
    }

    /// Number of distinct keys in the pending batch.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.pending.borrow().patch.len()
    }

    /// Whether a deferred flush is armed for the pending batch.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.shared.pending.borrow().scheduled
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending_operations() == 0
    }

    /// Number of registered completion callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.shared.callbacks.borrow().len()
    }

    /// Number of batches closed so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.generation.get()
    }

    /// Snapshot of the batcher's counters.
    #[must_use]
    pub fn stats(&self) -> BatcherStats {
        self.shared.stats.get()
    }

    /// The configuration this batcher was built with.
    #[must_use]
    pub fn config(&self) -> &BatcherConfig {
        &self.shared.config
    }

    /// Run `f` with a shared borrow of the store.
    ///
    /// # Panics
    ///
    /// If called from inside the store's own `write`.
    pub fn with_store<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.shared.store.borrow())
    }
}

impl<S: TargetStore, Q> fmt::Debug for Batcher<S, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.shared.pending.borrow();
        f.debug_struct("Batcher")
            .field("label", &self.shared.config.label)
            .field("pending_operations", &pending.operations)
            .field("pending_keys", &pending.patch.len())
            .field("scheduled", &pending.scheduled)
            .field("callbacks", &self.shared.callbacks.borrow().len())
            .field("generation", &self.shared.generation.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    type TestBatcher = Batcher<MemoryStore<String, i32>, TaskQueue>;

    fn setup() -> (TestBatcher, MemoryStore<String, i32>, TaskQueue) {
        let store = MemoryStore::new();
        let queue = TaskQueue::new();
        let batcher = Batcher::new(store.clone(), queue.clone());
        (batcher, store, queue)
    }

    fn set_sequence(batcher: &TestBatcher, n: usize) {
        for i in 0..n {
            batcher.set(i.to_string(), i as i32);
        }
    }

    fn counter(batcher: &TestBatcher) -> Rc<Cell<u32>> {
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        batcher.upon_completion(move || c.set(c.get() + 1));
        calls
    }

    #[derive(Debug)]
    struct Rejected;

    impl fmt::Display for Rejected {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("rejected")
        }
    }

    impl std::error::Error for Rejected {}

    #[derive(Default)]
    struct RejectingStore {
        writes: u64,
    }

    impl TargetStore for RejectingStore {
        type Key = &'static str;
        type Value = i32;
        type Error = Rejected;

        fn write(&mut self, _patch: Patch<&'static str, i32>) -> Result<(), Rejected> {
            self.writes += 1;
            Err(Rejected)
        }

        fn write_count(&self) -> u64 {
            self.writes
        }
    }

    // ---- flushing ----

    #[test]
    fn combines_operations_into_one_write() {
        let (batcher, store, _queue) = setup();
        set_sequence(&batcher, 3);
        assert_eq!(store.write_count(), 0);

        batcher.flush().unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn flush_returns_operation_count() {
        let (batcher, _store, _queue) = setup();
        set_sequence(&batcher, 5);
        assert_eq!(batcher.flush(), Ok(5));
    }

    #[test]
    fn shared_key_keeps_last_value() {
        let (batcher, store, _queue) = setup();
        batcher.set("multipleKey".into(), 1);
        batcher.set("multipleKey".into(), 2);
        batcher.flush().unwrap();
        assert_eq!(store.snapshot(), Patch::from([("multipleKey".to_string(), 2)]));
    }

    #[test]
    fn mixed_keys_merge_last_write_wins() {
        let store: MemoryStore<&str, i32> = MemoryStore::new();
        let batcher = Batcher::new(store.clone(), TaskQueue::new());
        batcher.set_data([("a", 1)]);
        batcher.set_data([("b", 2)]);
        batcher.set_data([("a", 3)]);
        assert_eq!(batcher.pending_len(), 2);

        assert_eq!(batcher.flush(), Ok(3));
        assert_eq!(store.snapshot(), Patch::from([("a", 3), ("b", 2)]));
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn empty_flush_is_noop() {
        let (batcher, store, _queue) = setup();
        let calls = counter(&batcher);
        assert_eq!(batcher.flush(), Ok(0));
        assert_eq!(store.write_count(), 0);
        assert_eq!(calls.get(), 0);
        assert_eq!(batcher.stats().empty_flushes, 1);
    }

    #[test]
    fn second_flush_returns_zero() {
        let (batcher, store, _queue) = setup();
        set_sequence(&batcher, 2);
        assert_eq!(batcher.flush(), Ok(2));
        assert_eq!(batcher.flush(), Ok(0));
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn flush_resets_state() {
        let (batcher, _store, _queue) = setup();
        set_sequence(&batcher, 4);
        assert!(batcher.is_scheduled());
        assert_eq!(batcher.pending_operations(), 4);

        batcher.flush().unwrap();
        assert!(batcher.is_idle());
        assert!(!batcher.is_scheduled());
        assert_eq!(batcher.pending_len(), 0);
        assert_eq!(batcher.generation(), 1);
    }

    #[test]
    fn empty_partial_counts_but_does_not_write() {
        let (batcher, store, queue) = setup();
        batcher.set_data(Patch::new());
        assert_eq!(batcher.pending_operations(), 1);
        assert_eq!(batcher.flush(), Ok(0));
        assert_eq!(store.write_count(), 0);
        assert!(!batcher.is_scheduled(), "batch must re-arm after closing");

        queue.run_until_idle().unwrap();
        batcher.set("k".into(), 1);
        assert!(batcher.is_scheduled());
    }

    // ---- completion callbacks ----

    #[test]
    fn callback_runs_after_flush() {
        let (batcher, _store, _queue) = setup();
        let calls = counter(&batcher);
        set_sequence(&batcher, 3);
        assert_eq!(calls.get(), 0);

        batcher.flush().unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn multiple_callbacks_fire_in_order() {
        let (batcher, _store, _queue) = setup();
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let o = Rc::clone(&order);
            batcher.upon_completion(move || o.borrow_mut().push(i));
        }
        assert_eq!(batcher.callback_count(), 3);
        set_sequence(&batcher, 1);
        batcher.flush().unwrap();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn callbacks_persist_across_flushes() {
        let (batcher, _store, _queue) = setup();
        let calls = counter(&batcher);
        for _ in 0..3 {
            set_sequence(&batcher, 2);
            batcher.flush().unwrap();
        }
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn callback_sees_written_store() {
        let (batcher, store, _queue) = setup();
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        let st = store.clone();
        batcher.upon_completion(move || s.set(st.write_count()));
        set_sequence(&batcher, 1);
        batcher.flush().unwrap();
        assert_eq!(seen.get(), 1);
    }

    // ---- deferred flushing ----

    #[test]
    fn set_data_is_not_synchronous() {
        let (batcher, store, _queue) = setup();
        set_sequence(&batcher, 3);
        assert!(store.is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn deferred_flush_runs_on_next_turn() {
        let (batcher, store, queue) = setup();
        set_sequence(&batcher, 3);
        assert_eq!(queue.pending(), 1, "exactly one deferred flush per batch");

        queue.run_turn();
        assert_eq!(store.write_count(), 1);
        assert_eq!(batcher.stats().deferred_flushes, 1);
        assert!(batcher.is_idle());
    }

    #[test]
    fn batches_on_separate_turns_write_separately() {
        let (batcher, store, queue) = setup();
        set_sequence(&batcher, 3);

        let b = batcher.clone();
        queue.defer(Box::new(move || {
            for i in 10..13 {
                b.set(i.to_string(), i);
            }
        }));

        queue.run_until_idle().unwrap();
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn manual_flush_preempts_deferred() {
        let (batcher, store, queue) = setup();
        let calls = counter(&batcher);
        set_sequence(&batcher, 3);
        assert_eq!(batcher.flush(), Ok(3));

        queue.run_until_idle().unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(calls.get(), 1);
        assert_eq!(batcher.stats().deferred_flushes, 0);
    }

    #[test]
    fn flush_after_deferred_flush_returns_zero() {
        let (batcher, store, queue) = setup();
        set_sequence(&batcher, 3);
        queue.run_until_idle().unwrap();
        assert_eq!(batcher.flush(), Ok(0));
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn stale_deferred_flush_leaves_new_batch_to_its_own_task() {
        let (batcher, store, queue) = setup();
        set_sequence(&batcher, 2);
        batcher.flush().unwrap();
        set_sequence(&batcher, 1);
        assert_eq!(queue.pending(), 2);

        assert_eq!(queue.run_turn(), 2);
        assert_eq!(store.write_count(), 2);
        assert_eq!(batcher.stats().deferred_flushes, 1);
    }

    #[test]
    fn auto_flush_disabled_never_schedules() {
        let store: MemoryStore<&str, i32> = MemoryStore::new();
        let queue = TaskQueue::new();
        let batcher = Batcher::with_config(
            store.clone(),
            queue.clone(),
            BatcherConfig::new().auto_flush(false),
        );
        batcher.set_data([("a", 1)]);
        assert!(queue.is_idle());
        assert!(!batcher.is_scheduled());
        assert_eq!(store.write_count(), 0);
        assert_eq!(batcher.flush(), Ok(1));
    }

    #[test]
    fn dropped_batcher_discards_deferred_flush() {
        let (batcher, store, queue) = setup();
        set_sequence(&batcher, 2);
        drop(batcher);
        queue.run_until_idle().unwrap();
        assert_eq!(store.write_count(), 0);
    }

    // ---- errors ----

    #[test]
    fn failed_write_resets_batch() {
        let queue = TaskQueue::new();
        let batcher = Batcher::new(RejectingStore::default(), queue.clone());
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        batcher.upon_completion(move || c.set(c.get() + 1));

        batcher.set_data([("a", 1)]);
        batcher.set_data([("b", 2)]);
        assert!(matches!(batcher.flush(), Err(FlushError::Store(Rejected))));
        assert_eq!(calls.get(), 0, "callbacks must not run for a failed write");
        assert!(batcher.is_idle());
        assert!(!batcher.is_scheduled());
        assert_eq!(batcher.stats().failed_writes, 1);

        assert!(matches!(batcher.flush(), Ok(0)));
        assert_eq!(batcher.with_store(|s| s.write_count()), 1);
    }

    #[test]
    fn deferred_write_failure_is_contained() {
        let queue = TaskQueue::new();
        let batcher = Batcher::new(RejectingStore::default(), queue.clone());
        batcher.set_data([("a", 1)]);
        queue.run_until_idle().unwrap();

        assert_eq!(batcher.with_store(|s| s.write_count()), 1);
        assert_eq!(batcher.stats().failed_writes, 1);
        assert!(batcher.is_idle());
    }

    #[test]
    fn panicking_callback_leaves_batcher_usable() {
        let (batcher, store, _queue) = setup();
        let armed = Rc::new(Cell::new(true));
        let a = Rc::clone(&armed);
        batcher.upon_completion(move || {
            if a.replace(false) {
                panic!("callback failure");
            }
        });

        set_sequence(&batcher, 2);
        let b = batcher.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || b.flush()));
        assert!(result.is_err());
        assert_eq!(store.write_count(), 1);
        assert!(batcher.is_idle());

        set_sequence(&batcher, 1);
        assert_eq!(batcher.flush(), Ok(1));
        assert_eq!(store.write_count(), 2);
    }

    // ---- reentrancy ----

    #[test]
    fn reentrant_flush_is_rejected() {
        let (batcher, store, _queue) = setup();
        let outcome = Rc::new(RefCell::new(None));
        let o = Rc::clone(&outcome);
        let b = batcher.clone();
        batcher.upon_completion(move || {
            *o.borrow_mut() = Some(b.flush());
        });

        set_sequence(&batcher, 1);
        assert_eq!(batcher.flush(), Ok(1));
        assert_eq!(*outcome.borrow(), Some(Err(FlushError::Reentrant)));
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn set_data_from_callback_starts_fresh_batch() {
        let (batcher, store, queue) = setup();
        let b = batcher.clone();
        let once = Rc::new(Cell::new(true));
        let o = Rc::clone(&once);
        batcher.upon_completion(move || {
            if o.replace(false) {
                b.set("follow-up".into(), 99);
            }
        });

        set_sequence(&batcher, 1);
        assert_eq!(batcher.flush(), Ok(1));
        assert_eq!(batcher.pending_operations(), 1);
        assert!(batcher.is_scheduled());

        queue.run_until_idle().unwrap();
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.get(&"follow-up".to_string()), Some(99));
    }

    #[test]
    fn callback_registered_during_flush_fires_next_time() {
        let (batcher, _store, _queue) = setup();
        let late_calls = Rc::new(Cell::new(0));
        let b = batcher.clone();
        let l = Rc::clone(&late_calls);
        let registered = Rc::new(Cell::new(false));
        let r = Rc::clone(&registered);
        batcher.upon_completion(move || {
            if !r.replace(true) {
                let l = Rc::clone(&l);
                b.upon_completion(move || l.set(l.get() + 1));
            }
        });

        set_sequence(&batcher, 1);
        batcher.flush().unwrap();
        assert_eq!(late_calls.get(), 0);

        set_sequence(&batcher, 1);
        batcher.flush().unwrap();
        assert_eq!(late_calls.get(), 1);
    }

    // ---- stats & debug ----

    #[test]
    fn stats_track_triggers() {
        let (batcher, _store, queue) = setup();
        set_sequence(&batcher, 3);
        batcher.flush().unwrap();
        set_sequence(&batcher, 2);
        queue.run_until_idle().unwrap();
        batcher.flush().unwrap();

        assert_eq!(
            batcher.stats(),
            BatcherStats {
                flushes: 2,
                operations: 5,
                empty_flushes: 1,
                deferred_flushes: 1,
                manual_flushes: 1,
                failed_writes: 0,
            }
        );
    }

    #[test]
    fn debug_format() {
        let (batcher, _store, _queue) = setup();
        set_sequence(&batcher, 2);
        let debug = format!("{batcher:?}");
        assert!(debug.contains("pending_operations: 2"));
        assert!(debug.contains("scheduled: true"));
    }
}
