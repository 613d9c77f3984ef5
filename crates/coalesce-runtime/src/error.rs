#![forbid(unsafe_code)]

//! Flush errors.

use std::fmt;

/// Error returned by [`Batcher::flush`](crate::Batcher::flush).
///
/// In both cases the batcher stays usable. For [`Store`](Self::Store) the
/// batch that failed to write has already been discarded; it is never
/// retried or merged into the next batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushError<E> {
    /// The store rejected the write. Completion callbacks were not invoked.
    Store(E),
    /// `flush()` was called while this batcher was already flushing, either
    /// from a completion callback or from inside the store's write.
    Reentrant,
}

impl<E> FlushError<E> {
    /// Whether this is a store failure.
    #[must_use]
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Whether this is a rejected reentrant flush.
    #[must_use]
    pub fn is_reentrant(&self) -> bool {
        matches!(self, Self::Reentrant)
    }
}

impl<E: fmt::Display> fmt::Display for FlushError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => write!(f, "store write failed: {err}"),
            Self::Reentrant => write!(f, "flush called while a flush is in progress"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for FlushError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Reentrant => None,
        }
    }
}
