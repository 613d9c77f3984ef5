#![forbid(unsafe_code)]

//! Proptest strategies for batcher update sequences.
//!
//! Keys are drawn from a small alphabet so sequences regularly hit the same
//! key more than once, which is where last-write-wins matters.

use coalesce_runtime::Patch;
use proptest::collection::vec;
use proptest::prelude::*;

/// Keys used by generated patches.
pub const KEYS: &[&str] = &["alpha", "beta", "gamma", "delta", "epsilon"];

/// A single key drawn from [`KEYS`].
pub fn key() -> impl Strategy<Value = &'static str> {
    proptest::sample::select(KEYS)
}

/// A patch of up to `max_keys` entries (possibly empty).
pub fn patch(max_keys: usize) -> impl Strategy<Value = Patch<&'static str, u32>> {
    vec((key(), any::<u32>()), 0..=max_keys)
        .prop_map(|entries| entries.into_iter().collect::<Patch<_, _>>())
}

/// A non-empty patch of up to `max_keys` entries.
pub fn non_empty_patch(max_keys: usize) -> impl Strategy<Value = Patch<&'static str, u32>> {
    vec((key(), any::<u32>()), 1..=max_keys.max(1))
        .prop_map(|entries| entries.into_iter().collect::<Patch<_, _>>())
}

/// One batch: `1..=max_ops` non-empty patches.
pub fn batch(max_ops: usize) -> impl Strategy<Value = Vec<Patch<&'static str, u32>>> {
    vec(non_empty_patch(3), 1..=max_ops.max(1))
}

/// Several batches, each intended for its own scheduler turn.
pub fn turns(
    max_turns: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Vec<Patch<&'static str, u32>>>> {
    vec(batch(max_ops), 1..=max_turns.max(1))
}

/// Fold a sequence of patches the way the batcher merges them.
#[must_use]
pub fn merged(seq: &[Patch<&'static str, u32>]) -> Patch<&'static str, u32> {
    let mut out = Patch::new();
    for p in seq {
        out.merge(p.clone());
    }
    out
}
