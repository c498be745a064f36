//! Collection cache entry and the snapshot published to consumers.

use crate::error::SyncError;
use crate::gate::{self, GateDecision, Items};
use chrono::Utc;
use estate_core::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// No scope, or nothing requested yet.
    Idle,
    Loading,
    Ready,
    Failed,
}

/// Cached collection for the current scope.
///
/// Only the binding engine writes to it, always through the equality gate.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<R> {
    items: Items<R>,
    status: FetchStatus,
    /// Status to fall back to when a fetch is abandoned.
    settled: FetchStatus,
    last_error: Option<SyncError>,
    last_fetched_at: Option<Timestamp>,
    /// Incremented every time `items` is replaced.
    revision: u64,
}

impl<R> CacheEntry<R> {
    pub(crate) fn new() -> Self {
        Self {
            items: gate::empty(),
            status: FetchStatus::Idle,
            settled: FetchStatus::Idle,
            last_error: None,
            last_fetched_at: None,
            revision: 0,
        }
    }

    pub(crate) fn status(&self) -> FetchStatus {
        self.status
    }

    pub(crate) fn items(&self) -> &Items<R> {
        &self.items
    }

    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn mark_loading(&mut self) {
        self.status = FetchStatus::Loading;
    }

    /// A fetch was cancelled without a replacement; return to the last
    /// settled status.
    pub(crate) fn abandon_loading(&mut self) {
        if self.status == FetchStatus::Loading {
            self.status = self.settled;
        }
    }
}

impl<R: PartialEq> CacheEntry<R> {
    /// Apply a successful fetch. Returns whether the items changed.
    pub(crate) fn resolve(&mut self, items: Vec<R>) -> bool {
        let changed = self.replace_items(items);
        if changed {
            self.last_fetched_at = Some(Utc::now());
        }
        self.status = FetchStatus::Ready;
        self.settled = FetchStatus::Ready;
        self.last_error = None;
        changed
    }

    /// Apply a failure. Data is never left alongside an error.
    pub(crate) fn fail(&mut self, error: SyncError) -> bool {
        let changed = self.replace_items(Vec::new());
        self.status = FetchStatus::Failed;
        self.settled = FetchStatus::Failed;
        self.last_error = Some(error);
        changed
    }

    /// Apply a locally computed replacement without touching the status.
    pub(crate) fn patch(&mut self, items: Vec<R>) -> bool {
        self.replace_items(items)
    }

    /// Carry the revision counter over from a previous entry so that it stays
    /// monotonic across scope changes.
    pub(crate) fn continue_from(previous: &CacheEntry<R>) -> Self {
        let mut entry = Self::new();
        entry.revision = previous.revision;
        if !previous.items.is_empty() {
            entry.revision += 1;
        }
        entry
    }

    fn replace_items(&mut self, next: Vec<R>) -> bool {
        match gate::pass(&self.items, next) {
            GateDecision::Kept => false,
            GateDecision::Replaced(items) => {
                self.items = items;
                self.revision += 1;
                true
            }
        }
    }
}

/// Read-only view of a binding, as published to consumers.
#[derive(Debug, Clone)]
pub struct Snapshot<S, R> {
    /// Scope the data belongs to.
    pub scope: Option<S>,
    pub items: Items<R>,
    pub status: FetchStatus,
    pub error: Option<SyncError>,
    /// Change signal: incremented each time `items` is replaced.
    pub revision: u64,
    pub last_fetched_at: Option<Timestamp>,
}

impl<S, R> Snapshot<S, R> {
    pub(crate) fn idle() -> Self {
        Self {
            scope: None,
            items: gate::empty(),
            status: FetchStatus::Idle,
            error: None,
            revision: 0,
            last_fetched_at: None,
        }
    }

    pub(crate) fn of(scope: Option<S>, entry: &CacheEntry<R>) -> Self {
        Self {
            scope,
            items: entry.items.clone(),
            status: entry.status,
            error: entry.last_error.clone(),
            revision: entry.revision,
            last_fetched_at: entry.last_fetched_at,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == FetchStatus::Loading
    }

    pub fn is_ready(&self) -> bool {
        self.status == FetchStatus::Ready
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<S: PartialEq, R> Snapshot<S, R> {
    /// Whether publishing `self` over `previous` would tell consumers anything.
    pub(crate) fn differs_from(&self, previous: &Self) -> bool {
        self.revision != previous.revision
            || self.status != previous.status
            || self.error != previous.error
            || self.scope != previous.scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{classify, RawError};
    use std::sync::Arc;

    #[test]
    fn test_identical_resolve_keeps_allocation() {
        let mut entry = CacheEntry::new();
        assert!(entry.resolve(vec![1, 2]));
        let first = entry.items().clone();
        assert!(!entry.resolve(vec![1, 2]));
        assert!(Arc::ptr_eq(&first, entry.items()));
        assert_eq!(entry.revision(), 1);
        assert_eq!(entry.status(), FetchStatus::Ready);
    }

    #[test]
    fn test_failure_clears_items() {
        let mut entry = CacheEntry::new();
        entry.resolve(vec![1, 2, 3]);
        let err = classify(&RawError::new("denied").with_status(403));
        assert!(entry.fail(err.clone()));
        let snapshot: Snapshot<u8, i32> = Snapshot::of(Some(1), &entry);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.status, FetchStatus::Failed);
        assert_eq!(snapshot.error, Some(err));
    }

    #[test]
    fn test_resolve_after_failure_clears_error() {
        let mut entry = CacheEntry::new();
        entry.fail(classify(&RawError::new("boom")));
        entry.resolve(vec![4]);
        assert_eq!(entry.status(), FetchStatus::Ready);
        assert!(Snapshot::<u8, i32>::of(None, &entry).error.is_none());
    }

    #[test]
    fn test_revision_is_monotonic_across_entries() {
        let mut entry = CacheEntry::new();
        entry.resolve(vec![1]);
        let next = CacheEntry::continue_from(&entry);
        assert_eq!(next.revision(), 2);
        assert!(next.items().is_empty());

        let empty: CacheEntry<i32> = CacheEntry::new();
        assert_eq!(CacheEntry::continue_from(&empty).revision(), 0);
    }

    #[test]
    fn test_abandoned_fetch_restores_settled_status() {
        let mut entry: CacheEntry<i32> = CacheEntry::new();
        entry.mark_loading();
        entry.abandon_loading();
        assert_eq!(entry.status(), FetchStatus::Idle);

        entry.resolve(vec![7]);
        entry.mark_loading();
        entry.abandon_loading();
        assert_eq!(entry.status(), FetchStatus::Ready);
        assert_eq!(entry.items().as_ref(), &[7]);
    }
}
