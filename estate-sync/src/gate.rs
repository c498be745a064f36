//! Equality gate for fetched collections.
//!
//! A chatty push channel triggers many refetches that return what is already
//! cached. The gate compares the new sequence with the cached one and keeps
//! the cached allocation when they are structurally equal, so consumers see
//! no change signal.

use std::sync::Arc;

/// Shared, immutable item sequence.
pub type Items<R> = Arc<[R]>;

/// Decision taken by [`pass`].
#[derive(Debug, Clone)]
pub enum GateDecision<R> {
    /// Structurally equal to the cached sequence; nothing to propagate.
    Kept,
    /// Different; the new sequence must replace the cached one.
    Replaced(Items<R>),
}

impl<R> GateDecision<R> {
    pub fn is_changed(&self) -> bool {
        matches!(self, GateDecision::Replaced(_))
    }
}

/// Compare `next` with `previous` element by element, in order.
pub fn pass<R: PartialEq>(previous: &Items<R>, next: Vec<R>) -> GateDecision<R> {
    if previous.as_ref() == next.as_slice() {
        GateDecision::Kept
    } else {
        GateDecision::Replaced(Arc::from(next))
    }
}

/// An empty sequence.
pub fn empty<R>() -> Items<R> {
    Arc::from(Vec::new())
}
