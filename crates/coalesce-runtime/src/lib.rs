#![forbid(unsafe_code)]

//! Write-coalescing batcher for single-threaded, cooperative hosts.
//!
//! Callers issue many small [`Batcher::set_data`] updates; the batcher
//! merges them (last write wins per key) and writes the result to a
//! [`TargetStore`] once per batch, then notifies completion callbacks.
//!
//! - [`Patch`]: key/value mapping with shallow merge.
//! - [`TargetStore`]: the two-method store contract; [`MemoryStore`] is an
//!   in-memory implementation.
//! - [`Scheduler`]: runs deferred flushes on a later turn; [`TaskQueue`] is a
//!   deterministic queue driven by its owner.
//! - [`BatcherConfig`]: auto-flush toggle and tracing label.
//!
//! # Feature Flags
//!
//! - `policy-config`: load [`BatcherConfig`] from TOML or JSON.
//! - `tokio`: `LocalSpawner`, a scheduler backed by `tokio::task::spawn_local`.

pub mod batcher;
pub mod config;
pub mod error;
pub mod patch;
pub mod scheduler;
pub mod store;

pub use batcher::{Batcher, BatcherStats};
pub use config::{BatcherConfig, ConfigError};
pub use error::FlushError;
pub use patch::Patch;
#[cfg(feature = "tokio")]
pub use scheduler::LocalSpawner;
pub use scheduler::{Scheduler, SchedulerError, Task, TaskQueue};
pub use store::{MemoryStore, TargetStore};
