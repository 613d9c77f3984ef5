#![forbid(unsafe_code)]

//! Cooperative schedulers for deferred flushes.
//!
//! A [`Scheduler`] accepts a one-shot [`Task`] and runs it on a later turn,
//! after the caller's synchronous work has unwound. It never runs the task
//! inline from [`defer`](Scheduler::defer).
//!
//! - [`TaskQueue`]: a deterministic FIFO that the owner drives explicitly,
//!   one turn at a time. Suitable for tests and for hosts with their own
//!   event loop.
//! - [`LocalSpawner`] (feature `tokio`): hands tasks to
//!   `tokio::task::spawn_local`.
//!
//! # Turns
//!
//! A turn runs exactly the tasks that were queued when the turn began. Tasks
//! queued while a turn is running wait for the next turn. This is what lets
//! two batches submitted on two turns produce two separate writes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// Runs tasks on a later turn of a single-threaded, cooperative loop.
pub trait Scheduler {
    /// Queue `task` to run after the current synchronous call stack unwinds.
    fn defer(&self, task: Task);
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn defer(&self, task: Task) {
        (**self).defer(task);
    }
}

/// Error type for scheduler operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// The queue was still non-empty after the maximum number of turns,
    /// usually because tasks keep re-queuing themselves.
    Starved {
        /// Turns run before giving up.
        turns: usize,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starved { turns } => {
                write!(f, "task queue still busy after {turns} turns")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

// ---------------------------------------------------------------------------
// TaskQueue
// ---------------------------------------------------------------------------

/// Deterministic single-threaded task queue.
///
/// Clones share the same queue, so one handle can be given to a
/// [`Batcher`](crate::Batcher) while the owner keeps another to drive turns.
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TaskQueue {
    /// Upper bound on turns taken by [`run_until_idle`](Self::run_until_idle).
    pub const MAX_TURNS: usize = 1024;

    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Whether no tasks are waiting.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run one turn: every task queued before this call, in FIFO order.
    ///
    /// Returns the number of tasks run. The queue is never borrowed while a
    /// task runs, so tasks may defer further work.
    pub fn run_turn(&self) -> usize {
        let due = self.tasks.borrow().len();
        for _ in 0..due {
            let task = self.tasks.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        due
    }

    /// Run turns until the queue is empty. Returns the number of turns run.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Starved`] if the queue is still busy after
    /// [`MAX_TURNS`](Self::MAX_TURNS) turns.
    pub fn run_until_idle(&self) -> Result<usize, SchedulerError> {
        let mut turns = 0;
        while !self.is_idle() {
            if turns == Self::MAX_TURNS {
                return Err(SchedulerError::Starved { turns });
            }
            self.run_turn();
            turns += 1;
        }
        Ok(turns)
    }
}

impl Scheduler for TaskQueue {
    fn defer(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LocalSpawner
// ---------------------------------------------------------------------------

/// Scheduler backed by `tokio::task::spawn_local`.
///
/// Deferred tasks become local tokio tasks, so they run once the current
/// task yields. `defer` panics when called outside a `LocalSet`, matching
/// `spawn_local`.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSpawner;

#[cfg(feature = "tokio")]
impl Scheduler for LocalSpawner {
    fn defer(&self, task: Task) {
        drop(tokio::task::spawn_local(async move { task() }));
    }
}
