//! Single-flight, cancellable pull fetches.
//!
//! The coordinator owns at most one in-flight fetch. Each fetch carries a
//! monotonic id and a cancellation token; its outcome is only accepted by
//! [`FetchCoordinator::settle`] if both still match, so a stale result can
//! never overwrite newer state.

use crate::error::{classify, RawError, SyncError};
use crate::scope::ScopeKey;
use crate::state::FetchStatus;
use crate::traits::PullFetch;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

pub(crate) type FetchId = u64;

/// Result of a fetch task, delivered back to the binding engine.
#[derive(Debug)]
pub(crate) struct FetchOutcome<S, R> {
    pub(crate) id: FetchId,
    pub(crate) scope: S,
    pub(crate) result: Result<Vec<R>, RawError>,
}

/// What a request to the coordinator did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FetchStart {
    /// A new fetch was spawned.
    Spawned(FetchId),
    /// A fetch for the same scope was already in flight.
    Joined(FetchId),
    /// The cached data is ready and nothing is in flight.
    Fresh,
    /// The collaborator failed its pre-flight check; no fetch was issued.
    ShortCircuited(SyncError),
}

#[derive(Debug)]
struct InFlight<S> {
    id: FetchId,
    scope: S,
    token: CancellationToken,
}

pub(crate) struct FetchCoordinator<S, R> {
    fetcher: Arc<dyn PullFetch<S, R>>,
    outcomes: mpsc::UnboundedSender<FetchOutcome<S, R>>,
    next_id: FetchId,
    in_flight: Option<InFlight<S>>,
}

impl<S: ScopeKey, R: Send + 'static> FetchCoordinator<S, R> {
    pub(crate) fn new(
        fetcher: Arc<dyn PullFetch<S, R>>,
        outcomes: mpsc::UnboundedSender<FetchOutcome<S, R>>,
    ) -> Self {
        Self {
            fetcher,
            outcomes,
            next_id: 0,
            in_flight: None,
        }
    }

    /// Id of the fetch currently in flight for `scope`.
    pub(crate) fn in_flight(&self, scope: &S) -> Option<FetchId> {
        self.in_flight
            .as_ref()
            .filter(|flight| &flight.scope == scope)
            .map(|flight| flight.id)
    }

    /// Start a fetch unless one is in flight or the data is already ready.
    pub(crate) fn ensure(&mut self, scope: &S, status: FetchStatus) -> FetchStart {
        if let Some(id) = self.in_flight(scope) {
            return FetchStart::Joined(id);
        }
        if status == FetchStatus::Ready {
            return FetchStart::Fresh;
        }
        self.start(scope)
    }

    /// Cancel whatever is in flight for `scope` and start over.
    pub(crate) fn refetch(&mut self, scope: &S) -> FetchStart {
        self.cancel(scope);
        self.start(scope)
    }

    /// Cancel the in-flight fetch for `scope`. Its result will be discarded.
    pub(crate) fn cancel(&mut self, scope: &S) -> bool {
        match self.in_flight.take() {
            Some(flight) if &flight.scope == scope => {
                debug!(fetch_id = flight.id, scope = %flight.scope, "Cancelling fetch");
                flight.token.cancel();
                true
            }
            other => {
                self.in_flight = other;
                false
            }
        }
    }

    /// Cancel any in-flight fetch regardless of scope.
    pub(crate) fn cancel_all(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            debug!(fetch_id = flight.id, scope = %flight.scope, "Cancelling fetch");
            flight.token.cancel();
        }
    }

    /// Accept an outcome if it belongs to the live fetch, clearing the slot.
    pub(crate) fn settle(&mut self, id: FetchId, scope: &S) -> bool {
        let live = matches!(
            &self.in_flight,
            Some(flight)
                if flight.id == id && &flight.scope == scope && !flight.token.is_cancelled()
        );
        if live {
            self.in_flight = None;
        }
        live
    }

    fn start(&mut self, scope: &S) -> FetchStart {
        // A different scope must be cancelled before this one starts.
        self.cancel_all();

        if let Err(raw) = self.fetcher.preflight() {
            let error = classify(&raw);
            debug!(scope = %scope, kind = ?error.kind, "Fetch pre-flight failed");
            return FetchStart::ShortCircuited(error);
        }

        self.next_id += 1;
        let id = self.next_id;
        let token = CancellationToken::new();
        self.in_flight = Some(InFlight {
            id,
            scope: scope.clone(),
            token: token.clone(),
        });

        let fetcher = Arc::clone(&self.fetcher);
        let outcomes = self.outcomes.clone();
        let scope = scope.clone();
        let span = tracing::debug_span!("pull_fetch", fetch_id = id, scope = %scope);
        tokio::spawn(
            async move {
                let result = tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        debug!("Fetch cancelled before completion");
                        return;
                    }
                    result = fetcher.fetch(&scope, token.clone()) => result,
                };
                let _ = outcomes.send(FetchOutcome { id, scope, result });
            }
            .instrument(span),
        );
        FetchStart::Spawned(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowFetcher {
        calls: AtomicUsize,
        configured: bool,
    }

    #[async_trait]
    impl PullFetch<String, u32> for SlowFetcher {
        fn preflight(&self) -> Result<(), RawError> {
            if self.configured {
                Ok(())
            } else {
                Err(RawError::not_configured("no client"))
            }
        }

        async fn fetch(
            &self,
            scope: &String,
            _cancel: CancellationToken,
        ) -> Result<Vec<u32>, RawError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(vec![scope.len() as u32])
        }
    }

    fn coordinator(
        configured: bool,
    ) -> (
        FetchCoordinator<String, u32>,
        Arc<SlowFetcher>,
        mpsc::UnboundedReceiver<FetchOutcome<String, u32>>,
    ) {
        let fetcher = Arc::new(SlowFetcher {
            calls: AtomicUsize::new(0),
            configured,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let shared: Arc<dyn PullFetch<String, u32>> = fetcher.clone();
        (FetchCoordinator::new(shared, tx), fetcher, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_joins_in_flight_fetch() {
        let (mut coordinator, fetcher, mut rx) = coordinator(true);
        let scope = "agency-1".to_string();
        let first = coordinator.ensure(&scope, FetchStatus::Idle);
        assert_eq!(first, FetchStart::Spawned(1));
        for _ in 0..5 {
            assert_eq!(coordinator.ensure(&scope, FetchStatus::Loading), FetchStart::Joined(1));
        }
        let outcome = rx.recv().await.expect("outcome");
        assert!(coordinator.settle(outcome.id, &outcome.scope));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.ensure(&scope, FetchStatus::Ready), FetchStart::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_supersedes_stale_fetch() {
        let (mut coordinator, _fetcher, mut rx) = coordinator(true);
        let scope = "agency-1".to_string();
        coordinator.ensure(&scope, FetchStatus::Idle);
        tokio::task::yield_now().await;
        assert_eq!(coordinator.refetch(&scope), FetchStart::Spawned(2));
        let outcome = rx.recv().await.expect("outcome");
        assert_eq!(outcome.id, 2);
        assert!(coordinator.settle(outcome.id, &scope));
        assert!(!coordinator.settle(1, &scope));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_is_not_settled() {
        let (mut coordinator, _fetcher, _rx) = coordinator(true);
        let scope = "agency-1".to_string();
        coordinator.ensure(&scope, FetchStatus::Idle);
        assert!(coordinator.cancel(&scope));
        assert!(!coordinator.settle(1, &scope));
        assert!(!coordinator.cancel(&scope));
    }

    #[tokio::test]
    async fn test_preflight_failure_short_circuits() {
        let (mut coordinator, fetcher, _rx) = coordinator(false);
        match coordinator.ensure(&"agency-1".to_string(), FetchStatus::Idle) {
            FetchStart::ShortCircuited(err) => assert_eq!(err.kind, ErrorKind::ConfigMissing),
            other => panic!("expected short circuit, got {other:?}"),
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.in_flight(&"agency-1".to_string()), None);
    }
}
