//! Scoped live-collection synchronization for the Estate back-office.
//!
//! A [`LiveCollection`] keeps the records of one agency fresh by combining an
//! initial pull fetch, a push channel scoped to that agency and debounced,
//! single-flight refetching. Unchanged refetches are suppressed by the
//! equality gate, so consumers only see a new [`Snapshot::revision`] when the
//! data actually changed.

pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod gate;
pub mod mutation;
pub mod scope;
pub mod state;
pub mod telemetry;
pub mod traits;
pub mod transport;

mod backoff;
mod fetch;
mod subscription;

pub use config::{
    AuthConfig, ConfigError, LogFormat, ReconnectConfig, SyncConfig, WatchConfig,
    DEFAULT_DEBOUNCE_WINDOW_MS,
};
pub use debounce::Debouncer;
pub use engine::{Binding, LiveCollection};
pub use error::{classify, ErrorKind, RawError, SyncError, CONFIG_MISSING_CODE};
pub use gate::{GateDecision, Items};
pub use mutation::{Mutation, MutationBackend, MutationKind, MutationPhase, MutationState};
pub use scope::{ScopeKey, ScopeTracker, ScopeTransition};
pub use state::{FetchStatus, Snapshot};
pub use traits::{ChangeKind, PullFetch, PushChannel, PushEvent, PushSink, Subscription};
