//! Push-channel subscription lifecycle.
//!
//! Keeps exactly one open subscription for the stable scope. The old
//! subscription is always closed before a new one is opened, and a channel
//! that closes on its own is reopened with backoff for as long as its scope
//! stays current.

use crate::backoff::Backoff;
use crate::config::ReconnectConfig;
use crate::scope::ScopeKey;
use crate::traits::{PushChannel, PushSignal, PushSink, Subscription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Active<S> {
    scope: S,
    /// Generation of the current connection attempt.
    generation: u64,
    handle: Option<Box<dyn Subscription>>,
    reopen: Option<JoinHandle<()>>,
    /// Set while the current connection is a reopen of a closed one.
    reopened: bool,
}

pub(crate) struct SubscriptionLifecycle<S> {
    channel: Arc<dyn PushChannel<S>>,
    signals: mpsc::UnboundedSender<PushSignal<S>>,
    generation: u64,
    active: Option<Active<S>>,
    backoff: Backoff,
}

impl<S: ScopeKey> SubscriptionLifecycle<S> {
    pub(crate) fn new(
        channel: Arc<dyn PushChannel<S>>,
        signals: mpsc::UnboundedSender<PushSignal<S>>,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            channel,
            signals,
            generation: 0,
            active: None,
            backoff: Backoff::new(reconnect),
        }
    }

    /// Open a subscription for `scope`, closing any previous one first.
    pub(crate) fn open(&mut self, scope: &S) {
        self.close();
        self.backoff.reset();
        self.active = Some(Active {
            scope: scope.clone(),
            generation: 0,
            handle: None,
            reopen: None,
            reopened: false,
        });
        self.connect(false);
    }

    /// Close the active subscription, if any, and forget its scope.
    pub(crate) fn close(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        if let Some(reopen) = active.reopen.take() {
            reopen.abort();
        }
        if let Some(handle) = active.handle.take() {
            debug!(scope = %active.scope, generation = active.generation, "Closing subscription");
            handle.close();
        }
    }

    /// Whether a signal stamped with `generation` comes from the live subscription.
    pub(crate) fn accepts(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.generation == generation && active.handle.is_some())
    }

    /// The channel reported it is connected. Returns `true` when this
    /// completes a reopen after an unexpected close.
    pub(crate) fn on_connected(&mut self, generation: u64) -> bool {
        if !self.accepts(generation) {
            return false;
        }
        self.backoff.reset();
        match self.active.as_mut() {
            Some(active) => {
                info!(scope = %active.scope, generation, "Push channel connected");
                std::mem::take(&mut active.reopened)
            }
            None => false,
        }
    }

    /// The channel closed on its own; schedule a reopen for the same scope.
    pub(crate) fn on_closed(&mut self, generation: u64, reason: &str) {
        if !self.accepts(generation) {
            debug!(generation, "Ignoring close from superseded subscription");
            return;
        }
        let delay = self.backoff.next_delay();
        let Some(active) = self.active.as_mut() else {
            return;
        };
        warn!(
            scope = %active.scope,
            generation,
            reason = reason,
            delay_ms = delay.as_millis() as u64,
            "Push channel closed, scheduling reopen"
        );
        if let Some(handle) = active.handle.take() {
            handle.close();
        }
        let signals = self.signals.clone();
        active.reopen = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(PushSignal::Reopen { generation });
        }));
    }

    /// A scheduled reopen is due.
    pub(crate) fn on_reopen(&mut self, generation: u64) {
        let due = self
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation && active.handle.is_none());
        if due {
            self.connect(true);
        }
    }

    fn connect(&mut self, reopened: bool) {
        self.generation += 1;
        let generation = self.generation;
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.generation = generation;
        active.reopen = None;
        active.reopened = reopened;

        let sink = PushSink::new(generation, self.signals.clone());
        match self.channel.open(&active.scope, sink) {
            Ok(handle) => {
                debug!(scope = %active.scope, generation, reopened, "Subscription opened");
                active.handle = Some(handle);
            }
            Err(err) => {
                let delay = self.backoff.next_delay();
                warn!(
                    scope = %active.scope,
                    generation,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Failed to open subscription, scheduling reopen"
                );
                let signals = self.signals.clone();
                active.reopen = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = signals.send(PushSignal::Reopen { generation });
                }));
            }
        }
    }
}

impl<S> Drop for SubscriptionLifecycle<S> {
    fn drop(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Some(reopen) = active.reopen.take() {
                reopen.abort();
            }
            if let Some(handle) = active.handle.take() {
                handle.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RawError;
    use crate::traits::{ChangeKind, PushEvent};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        opened: Mutex<Vec<(String, u64)>>,
        closed: Arc<Mutex<Vec<String>>>,
        sinks: Mutex<Vec<PushSink<String>>>,
    }

    struct RecordedSubscription {
        scope: String,
        closed: Arc<Mutex<Vec<String>>>,
    }

    impl Subscription for RecordedSubscription {
        fn close(self: Box<Self>) {
            let Self { scope, closed } = *self;
            closed.lock().unwrap().push(scope);
        }
    }

    impl PushChannel<String> for Recorder {
        fn open(
            &self,
            scope: &String,
            sink: PushSink<String>,
        ) -> Result<Box<dyn Subscription>, RawError> {
            let generation = self.opened.lock().unwrap().len() as u64 + 1;
            self.opened.lock().unwrap().push((scope.clone(), generation));
            self.sinks.lock().unwrap().push(sink);
            Ok(Box::new(RecordedSubscription {
                scope: scope.clone(),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn lifecycle() -> (
        SubscriptionLifecycle<String>,
        Arc<Recorder>,
        mpsc::UnboundedReceiver<PushSignal<String>>,
    ) {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let reconnect = ReconnectConfig {
            initial_ms: 100,
            max_ms: 1_000,
            multiplier: 2.0,
            jitter_ms: 0,
        };
        let channel: Arc<dyn PushChannel<String>> = recorder.clone();
        (SubscriptionLifecycle::new(channel, tx, reconnect), recorder, rx)
    }

    #[tokio::test]
    async fn test_switching_scope_closes_before_opening() {
        let (mut lifecycle, recorder, _rx) = lifecycle();
        lifecycle.open(&"agency-1".to_string());
        lifecycle.open(&"agency-2".to_string());
        assert_eq!(recorder.closed.lock().unwrap().as_slice(), ["agency-1".to_string()]);
        assert!(!lifecycle.accepts(1));
        assert!(lifecycle.accepts(2));
        lifecycle.close();
        assert_eq!(recorder.closed.lock().unwrap().len(), 2);
        assert!(!lifecycle.accepts(2));
    }

    #[tokio::test]
    async fn test_sink_signals_carry_generation() {
        let (mut lifecycle, recorder, mut rx) = lifecycle();
        lifecycle.open(&"agency-1".to_string());
        let sink = recorder.sinks.lock().unwrap()[0].clone();
        assert!(sink.emit(PushEvent::new("agency-1".to_string(), ChangeKind::Created)));
        match rx.recv().await {
            Some(PushSignal::Event { generation, event }) => {
                assert_eq!(generation, 1);
                assert_eq!(event.kind, ChangeKind::Created);
            }
            other => panic!("unexpected signal {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_close_reopens_same_scope() {
        let (mut lifecycle, recorder, mut rx) = lifecycle();
        lifecycle.open(&"agency-1".to_string());
        lifecycle.on_closed(1, "connection reset");
        assert!(!lifecycle.accepts(1));

        let started = tokio::time::Instant::now();
        match rx.recv().await {
            Some(PushSignal::Reopen { generation }) => lifecycle.on_reopen(generation),
            other => panic!("unexpected signal {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(lifecycle.accepts(2));
        assert!(lifecycle.on_connected(2));
        assert!(!lifecycle.on_connected(2));
        let opened = recorder.opened.lock().unwrap().clone();
        assert_eq!(opened.iter().filter(|(scope, _)| scope == "agency-1").count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_is_dropped_after_scope_change() {
        let (mut lifecycle, recorder, mut rx) = lifecycle();
        lifecycle.open(&"agency-1".to_string());
        lifecycle.on_closed(1, "gone");
        lifecycle.open(&"agency-2".to_string());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
        lifecycle.on_reopen(1);
        let opened = recorder.opened.lock().unwrap().clone();
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[1].0, "agency-2");
    }
}
