//! Live collection bindings.
//!
//! Every [`Binding`] is served by one engine task that exclusively owns the
//! scope tracker, the cache entry, the fetch coordinator, the debouncer and
//! the subscription lifecycle. Fetch tasks, debounce timers and push
//! channels report back to it over channels and it handles one message at a
//! time, so no two writes to the cache entry ever interleave.
//!
//! ## Lifecycle
//!
//! 1. The scope tracker decides whether a supplied scope is a real change
//! 2. The old debounce timer, fetch and subscription are cancelled/closed
//! 3. A subscription is opened for the new scope
//! 4. The initial fetch is started
//! 5. Push events reset the debouncer, which triggers a refetch when quiet
//! 6. Every fetch result passes through the equality gate before publishing

use crate::config::SyncConfig;
use crate::debounce::Debouncer;
use crate::error::classify;
use crate::fetch::{FetchCoordinator, FetchOutcome, FetchStart};
use crate::scope::{ScopeKey, ScopeTracker, ScopeTransition};
use crate::state::{CacheEntry, FetchStatus, Snapshot};
use crate::subscription::SubscriptionLifecycle;
use crate::traits::{PullFetch, PushChannel, PushSignal};
use estate_core::Record;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn, Instrument};

type Patch<R> = Box<dyn FnOnce(&[R]) -> Vec<R> + Send>;

enum Command<S, R> {
    SetScope(Option<S>),
    Ensure,
    Refetch,
    Cancel,
    Patch(Patch<R>),
    DebounceFired { generation: u64 },
}

/// Factory for live collection bindings sharing the same collaborators.
pub struct LiveCollection<S, R> {
    fetcher: Arc<dyn PullFetch<S, R>>,
    channel: Arc<dyn PushChannel<S>>,
    config: SyncConfig,
}

impl<S, R> Clone for LiveCollection<S, R> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            channel: Arc::clone(&self.channel),
            config: self.config.clone(),
        }
    }
}

impl<S: ScopeKey, R: Record> LiveCollection<S, R> {
    pub fn new<F, P>(fetcher: Arc<F>, channel: Arc<P>, config: SyncConfig) -> Self
    where
        F: PullFetch<S, R>,
        P: PushChannel<S>,
    {
        Self {
            fetcher,
            channel,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Bind to `scope` and start keeping its collection fresh.
    ///
    /// Must be called from within a tokio runtime. Dropping the returned
    /// binding tears it down.
    pub fn bind(&self, scope: Option<S>) -> Binding<S, R> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(Snapshot::idle());
        let (changes_tx, changes_rx) = watch::channel(0);
        let shutdown = CancellationToken::new();

        let engine = Engine {
            config: self.config.clone(),
            tracker: ScopeTracker::new(),
            entry: CacheEntry::new(),
            coordinator: FetchCoordinator::new(Arc::clone(&self.fetcher), outcomes_tx),
            subscriptions: SubscriptionLifecycle::new(
                Arc::clone(&self.channel),
                signals_tx,
                self.config.reconnect.clone(),
            ),
            debouncer: None,
            scope_generation: 0,
            commands: commands_tx.clone(),
            state: state_tx,
            changes: changes_tx,
        };

        // Queued before the engine starts, so it is the first thing handled.
        let _ = commands_tx.send(Command::SetScope(scope));

        let task = tokio::spawn(
            engine
                .run(commands_rx, outcomes_rx, signals_rx, shutdown.clone())
                .instrument(tracing::debug_span!("live_collection")),
        );

        Binding {
            commands: commands_tx,
            state: state_rx,
            changes: changes_rx,
            shutdown,
            task: Some(task),
        }
    }
}

/// Consumer handle of one live collection.
pub struct Binding<S, R> {
    commands: mpsc::UnboundedSender<Command<S, R>>,
    state: watch::Receiver<Snapshot<S, R>>,
    changes: watch::Receiver<u64>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<S: ScopeKey, R: Record> Binding<S, R> {
    /// Latest published state.
    pub fn snapshot(&self) -> Snapshot<S, R> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every published change, status transitions included.
    pub fn watch(&self) -> watch::Receiver<Snapshot<S, R>> {
        self.state.clone()
    }

    /// Receiver notified only when the cached items are replaced.
    ///
    /// Carries the new revision. Refetches that return identical data,
    /// and the `Loading` transitions around them, do not notify it.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    ///
    /// Returns `None` if the binding is torn down first.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&Snapshot<S, R>) -> bool,
    ) -> Option<Snapshot<S, R>> {
        let mut rx = self.state.clone();
        let snapshot = rx.wait_for(|snapshot| predicate(snapshot)).await.ok()?;
        Some(snapshot.clone())
    }

    /// Supply the current scope. Equal values are ignored.
    pub fn set_scope(&self, scope: Option<S>) {
        self.send(Command::SetScope(scope));
    }

    /// Fetch unless data is ready or a fetch is already in flight.
    pub fn ensure(&self) {
        self.send(Command::Ensure);
    }

    /// Cancel any in-flight fetch and fetch again.
    pub fn refetch(&self) {
        self.send(Command::Refetch);
    }

    /// Cancel the in-flight fetch, discarding its result.
    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    /// Replace the cached items with `patch(current)`, through the equality gate.
    ///
    /// Only applied while data is loaded or loading; a failed or idle binding
    /// ignores it.
    pub fn apply_optimistic<F>(&self, patch: F)
    where
        F: FnOnce(&[R]) -> Vec<R> + Send + 'static,
    {
        self.send(Command::Patch(Box::new(patch)));
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.commands.is_closed()
    }

    /// Tear the binding down and wait for its engine to stop.
    pub async fn close(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn send(&self, command: Command<S, R>) {
        if self.commands.send(command).is_err() {
            debug!("Binding already closed, dropping command");
        }
    }
}

impl<S, R> Drop for Binding<S, R> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Engine<S, R> {
    config: SyncConfig,
    tracker: ScopeTracker<S>,
    entry: CacheEntry<R>,
    coordinator: FetchCoordinator<S, R>,
    subscriptions: SubscriptionLifecycle<S>,
    debouncer: Option<Debouncer>,
    /// Bumped on every scope change; stale debounce fires carry an old value.
    scope_generation: u64,
    commands: mpsc::UnboundedSender<Command<S, R>>,
    state: watch::Sender<Snapshot<S, R>>,
    changes: watch::Sender<u64>,
}

impl<S: ScopeKey, R: Record> Engine<S, R> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command<S, R>>,
        mut outcomes: mpsc::UnboundedReceiver<FetchOutcome<S, R>>,
        mut signals: mpsc::UnboundedReceiver<PushSignal<S>>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(command) = commands.recv() => self.handle_command(command),
                Some(outcome) = outcomes.recv() => self.handle_outcome(outcome),
                Some(signal) = signals.recv() => self.handle_signal(signal),
                else => break,
            }
        }
        self.teardown();
    }

    fn handle_command(&mut self, command: Command<S, R>) {
        match command {
            Command::SetScope(next) => self.apply_scope(next),
            Command::Ensure => {
                if let Some(scope) = self.tracker.current().cloned() {
                    let start = self.coordinator.ensure(&scope, self.entry.status());
                    self.apply_start(&scope, start);
                }
            }
            Command::Refetch => {
                if let Some(scope) = self.tracker.current().cloned() {
                    let start = self.coordinator.refetch(&scope);
                    self.apply_start(&scope, start);
                }
            }
            Command::Cancel => {
                if let Some(scope) = self.tracker.current().cloned() {
                    if self.coordinator.cancel(&scope) {
                        self.entry.abandon_loading();
                    }
                }
            }
            Command::Patch(patch) => {
                let applicable = matches!(
                    self.entry.status(),
                    FetchStatus::Ready | FetchStatus::Loading
                );
                if self.tracker.current().is_some() && applicable {
                    let next = patch(self.entry.items().as_ref());
                    let changed = self.entry.patch(next);
                    debug!(changed, "Applied optimistic patch");
                } else {
                    debug!(status = ?self.entry.status(), "Ignoring optimistic patch");
                }
            }
            Command::DebounceFired { generation } => {
                if generation != self.scope_generation {
                    trace!(generation, "Ignoring debounce fire from previous scope");
                    return;
                }
                if let Some(scope) = self.tracker.current().cloned() {
                    debug!(scope = %scope, "Debounced refetch");
                    let start = self.coordinator.refetch(&scope);
                    self.apply_start(&scope, start);
                }
            }
        }
        self.publish();
    }

    fn apply_scope(&mut self, next: Option<S>) {
        let ScopeTransition::Changed { previous, current } = self.tracker.observe(next) else {
            return;
        };
        debug!(previous = ?previous, current = ?current, "Scope changed");

        // Everything bound to the old scope goes first.
        self.debouncer = None;
        if let Some(previous) = &previous {
            self.coordinator.cancel(previous);
        }
        self.subscriptions.close();
        self.scope_generation += 1;
        self.entry = CacheEntry::continue_from(&self.entry);

        if let Some(scope) = current {
            // Listen before loading so no change slips in between.
            self.subscriptions.open(&scope);
            self.debouncer = Some(self.spawn_debouncer());
            let start = self.coordinator.ensure(&scope, self.entry.status());
            self.apply_start(&scope, start);
        }
    }

    fn apply_start(&mut self, scope: &S, start: FetchStart) {
        match start {
            FetchStart::Spawned(fetch_id) => {
                debug!(scope = %scope, fetch_id, "Fetch started");
                self.entry.mark_loading();
            }
            FetchStart::Joined(fetch_id) => {
                trace!(scope = %scope, fetch_id, "Joined in-flight fetch");
            }
            FetchStart::Fresh => {}
            FetchStart::ShortCircuited(error) => {
                warn!(scope = %scope, kind = ?error.kind, "Fetch not attempted");
                self.entry.fail(error);
            }
        }
    }

    fn handle_outcome(&mut self, outcome: FetchOutcome<S, R>) {
        let FetchOutcome { id, scope, result } = outcome;
        if !self.tracker.is_current(&scope) || !self.coordinator.settle(id, &scope) {
            debug!(fetch_id = id, scope = %scope, "Discarding stale fetch result");
            return;
        }
        match result {
            Ok(items) => {
                let count = items.len();
                let changed = self.entry.resolve(items);
                debug!(fetch_id = id, scope = %scope, count, changed, "Fetch resolved");
            }
            Err(raw) => {
                let error = classify(&raw);
                warn!(
                    fetch_id = id,
                    scope = %scope,
                    kind = ?error.kind,
                    error = %raw,
                    "Fetch failed"
                );
                self.entry.fail(error);
            }
        }
        self.publish();
    }

    fn handle_signal(&mut self, signal: PushSignal<S>) {
        match signal {
            PushSignal::Event { generation, event } => {
                if !self.subscriptions.accepts(generation) {
                    trace!(generation, "Ignoring event from superseded subscription");
                    return;
                }
                if !self.tracker.is_current(&event.scope) {
                    debug!(scope = %event.scope, "Ignoring event for another scope");
                    return;
                }
                trace!(scope = %event.scope, kind = ?event.kind, "Change event");
                self.poke_debouncer();
            }
            PushSignal::Connected { generation } => {
                if self.subscriptions.on_connected(generation) && self.config.refetch_on_reconnect {
                    debug!(generation, "Channel reopened, scheduling refetch");
                    self.poke_debouncer();
                }
            }
            PushSignal::Closed { generation, reason } => {
                self.subscriptions.on_closed(generation, &reason);
            }
            PushSignal::Reopen { generation } => {
                self.subscriptions.on_reopen(generation);
            }
        }
    }

    fn poke_debouncer(&self) {
        if let Some(debouncer) = &self.debouncer {
            debouncer.poke();
        }
    }

    fn spawn_debouncer(&self) -> Debouncer {
        let commands = self.commands.clone();
        let generation = self.scope_generation;
        Debouncer::spawn(self.config.debounce_window(), move || {
            let _ = commands.send(Command::DebounceFired { generation });
        })
    }

    fn publish(&self) {
        let next = Snapshot::of(self.tracker.current().cloned(), &self.entry);
        self.state.send_if_modified(|current| {
            if next.differs_from(current) {
                *current = next;
                true
            } else {
                false
            }
        });
        let revision = self.entry.revision();
        self.changes.send_if_modified(|current| {
            let bumped = *current != revision;
            *current = revision;
            bumped
        });
    }

    fn teardown(&mut self) {
        self.debouncer = None;
        self.coordinator.cancel_all();
        self.subscriptions.close();
        debug!(scope = ?self.tracker.current(), "Binding closed");
    }
}
