//! Create/update/delete execution with the same error classification as fetches.
//!
//! A mutation never touches a binding's cache. After a successful run the
//! caller either calls [`Binding::refetch`](crate::Binding::refetch) or
//! applies an optimistic patch.

use crate::error::{classify, RawError, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Backend that performs the actual write.
#[async_trait]
pub trait MutationBackend<I, O>: Send + Sync + 'static {
    /// Same contract as [`PullFetch::preflight`](crate::PullFetch::preflight).
    fn preflight(&self) -> Result<(), RawError> {
        Ok(())
    }

    async fn mutate(&self, kind: MutationKind, input: I) -> Result<O, RawError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationPhase {
    Idle,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct MutationState<O> {
    pub phase: MutationPhase,
    /// Output of the last successful run.
    pub output: Option<O>,
    pub error: Option<SyncError>,
}

impl<O> MutationState<O> {
    fn idle() -> Self {
        Self {
            phase: MutationPhase::Idle,
            output: None,
            error: None,
        }
    }

    pub fn loading(&self) -> bool {
        self.phase == MutationPhase::Running
    }

    pub fn success(&self) -> bool {
        self.phase == MutationPhase::Succeeded
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }
}

type SuccessHook<O> = Box<dyn Fn(&O) + Send + Sync>;
type ErrorHook = Box<dyn Fn(&SyncError) + Send + Sync>;

/// One kind of write against one backend.
///
/// `execute` takes `&mut self`, so a single wrapper never runs twice at once.
pub struct Mutation<I, O> {
    backend: Arc<dyn MutationBackend<I, O>>,
    kind: MutationKind,
    state: watch::Sender<MutationState<O>>,
    on_success: Option<SuccessHook<O>>,
    on_error: Option<ErrorHook>,
}

impl<I: Send + 'static, O: Clone + Send + Sync + 'static> Mutation<I, O> {
    pub fn new<B>(backend: Arc<B>, kind: MutationKind) -> Self
    where
        B: MutationBackend<I, O>,
    {
        let (state, _) = watch::channel(MutationState::idle());
        Self {
            backend,
            kind,
            state,
            on_success: None,
            on_error: None,
        }
    }

    pub fn on_success(mut self, hook: impl Fn(&O) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&SyncError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    /// Run one write. Dropping the returned future mid-flight returns the
    /// wrapper to `Idle`.
    pub async fn execute(&mut self, input: I) -> Result<O, SyncError> {
        self.state.send_replace(MutationState {
            phase: MutationPhase::Running,
            output: None,
            error: None,
        });
        let running = RunningGuard { state: &self.state };

        let result = match self.backend.preflight() {
            Ok(()) => self.backend.mutate(self.kind, input).await,
            Err(raw) => Err(raw),
        };

        running.settle();
        match result {
            Ok(output) => {
                debug!(kind = %self.kind, "Mutation succeeded");
                if let Some(hook) = &self.on_success {
                    hook(&output);
                }
                self.state.send_replace(MutationState {
                    phase: MutationPhase::Succeeded,
                    output: Some(output.clone()),
                    error: None,
                });
                Ok(output)
            }
            Err(raw) => {
                let error = classify(&raw);
                warn!(kind = %self.kind, error_kind = ?error.kind, error = %raw, "Mutation failed");
                if let Some(hook) = &self.on_error {
                    hook(&error);
                }
                self.state.send_replace(MutationState {
                    phase: MutationPhase::Failed,
                    output: None,
                    error: Some(error.clone()),
                });
                Err(error)
            }
        }
    }

    /// Return to `Idle`, forgetting the last outcome.
    pub fn reset(&self) {
        self.state.send_replace(MutationState::idle());
    }

    pub fn state(&self) -> MutationState<O> {
        self.state.borrow().clone()
    }

    pub fn loading(&self) -> bool {
        self.state.borrow().loading()
    }

    pub fn success(&self) -> bool {
        self.state.borrow().success()
    }

    pub fn error(&self) -> Option<SyncError> {
        self.state.borrow().error.clone()
    }

    pub fn watch(&self) -> watch::Receiver<MutationState<O>> {
        self.state.subscribe()
    }
}

/// Resets a `Running` state to `Idle` unless the run settled.
struct RunningGuard<'a, O> {
    state: &'a watch::Sender<MutationState<O>>,
}

impl<O> RunningGuard<'_, O> {
    fn settle(self) {
        std::mem::forget(self);
    }
}

impl<O> Drop for RunningGuard<'_, O> {
    fn drop(&mut self) {
        debug!("Mutation dropped while running");
        self.state.send_replace(MutationState::idle());
    }
}
