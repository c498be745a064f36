//! Collaborator interfaces consumed by the synchronization layer.
//!
//! A binding never reaches for a global client: the pull fetch and the push
//! channel are injected when a [`LiveCollection`](crate::LiveCollection) is
//! built, which keeps scope lifecycle and tests free of process-wide state.

use crate::error::RawError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Pull side: fetch the whole collection for one scope.
///
/// Implementations must be idempotent and safe to call repeatedly. They
/// should abort their I/O when `cancel` fires; at minimum their result is
/// ignored once the token is cancelled.
#[async_trait]
pub trait PullFetch<S, R>: Send + Sync + 'static {
    /// Cheap check run before every fetch. An error here means no I/O is
    /// attempted at all; report missing setup with
    /// [`RawError::not_configured`].
    fn preflight(&self) -> Result<(), RawError> {
        Ok(())
    }

    async fn fetch(&self, scope: &S, cancel: CancellationToken) -> Result<Vec<R>, RawError>;
}

/// Push side: open a change-notification subscription for one scope.
///
/// `open` must not block. Implementations spawn whatever connection task
/// they need and report through `sink`.
pub trait PushChannel<S>: Send + Sync + 'static {
    fn open(&self, scope: &S, sink: PushSink<S>) -> Result<Box<dyn Subscription>, RawError>;
}

/// An open push subscription.
pub trait Subscription: Send {
    /// Stop delivering events and release the underlying connection.
    fn close(self: Box<Self>);
}

/// Kind of change reported by the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A change notification tagged with the scope it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent<S> {
    pub scope: S,
    pub kind: ChangeKind,
}

impl<S> PushEvent<S> {
    pub fn new(scope: S, kind: ChangeKind) -> Self {
        Self { scope, kind }
    }
}

/// Signals delivered from a subscription to its binding.
#[derive(Debug)]
pub(crate) enum PushSignal<S> {
    Event { generation: u64, event: PushEvent<S> },
    Connected { generation: u64 },
    Closed { generation: u64, reason: String },
    Reopen { generation: u64 },
}

/// Handle given to a [`PushChannel`] to report events for one subscription.
///
/// Every sink is stamped with the generation of the subscription it was
/// created for; signals from superseded subscriptions are discarded.
pub struct PushSink<S> {
    generation: u64,
    tx: mpsc::UnboundedSender<PushSignal<S>>,
}

impl<S> Clone for PushSink<S> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            tx: self.tx.clone(),
        }
    }
}

impl<S> std::fmt::Debug for PushSink<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSink")
            .field("generation", &self.generation)
            .field("is_closed", &self.tx.is_closed())
            .finish()
    }
}

impl<S> PushSink<S> {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<PushSignal<S>>) -> Self {
        Self { generation, tx }
    }

    /// Report a change event. Returns `false` once the binding is gone.
    pub fn emit(&self, event: PushEvent<S>) -> bool {
        self.tx
            .send(PushSignal::Event {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    /// Report that the underlying connection is established.
    pub fn connected(&self) -> bool {
        self.tx
            .send(PushSignal::Connected {
                generation: self.generation,
            })
            .is_ok()
    }

    /// Report that the underlying connection closed unexpectedly.
    pub fn closed(&self, reason: impl Into<String>) -> bool {
        self.tx
            .send(PushSignal::Closed {
                generation: self.generation,
                reason: reason.into(),
            })
            .is_ok()
    }

    /// Whether the binding that owns this sink has been torn down.
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }
}
