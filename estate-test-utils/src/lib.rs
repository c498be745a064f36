//! Estate Test Utilities
//!
//! Shared test infrastructure for the Estate workspace:
//! - Proptest generators for ids and records
//! - Scriptable collaborators for live collections
//! - Fixtures for common scenarios
//! - Assertions over published snapshots

pub use estate_core::{
    AgencyId, CollectionRecord, Contract, ContractId, ContractStatus, EntityIdType, EntityKind,
    Owner, OwnerId, Property, PropertyId, PropertyKind, PropertyStatus, Record, Timestamp,
};
pub use estate_sync::{
    ChangeKind, ErrorKind, FetchStatus, RawError, Snapshot, SyncConfig, SyncError,
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

pub mod mocks {
    //! In-memory collaborators with call recording.

    use super::*;
    use async_trait::async_trait;
    use estate_sync::{
        MutationBackend, MutationKind, PullFetch, PushChannel, PushEvent, PushSink, Subscription,
    };
    use std::collections::HashMap;
    use std::hash::Hash;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[derive(Debug, Clone)]
    struct Script<R> {
        delay: Duration,
        result: Result<Vec<R>, RawError>,
    }

    /// Pull fetch answering from per-scope scripts.
    ///
    /// Scopes without a script resolve to an empty collection.
    pub struct ScriptedFetcher<S, R> {
        scripts: Mutex<HashMap<S, Script<R>>>,
        calls: Mutex<Vec<S>>,
        completed: AtomicUsize,
        configured: AtomicBool,
    }

    impl<S, R> Default for ScriptedFetcher<S, R> {
        fn default() -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                completed: AtomicUsize::new(0),
                configured: AtomicBool::new(true),
            }
        }
    }

    impl<S: Clone + Eq + Hash, R: Clone> ScriptedFetcher<S, R> {
        pub fn new() -> Self {
            Self::default()
        }

        /// Resolve `scope` immediately with `items`.
        pub fn respond(&self, scope: S, items: Vec<R>) {
            self.respond_after(scope, Duration::ZERO, items);
        }

        /// Resolve `scope` with `items` after `delay`.
        pub fn respond_after(&self, scope: S, delay: Duration, items: Vec<R>) {
            lock(&self.scripts).insert(
                scope,
                Script {
                    delay,
                    result: Ok(items),
                },
            );
        }

        /// Reject fetches for `scope` with `error`.
        pub fn reject(&self, scope: S, error: RawError) {
            lock(&self.scripts).insert(
                scope,
                Script {
                    delay: Duration::ZERO,
                    result: Err(error),
                },
            );
        }

        /// Make the pre-flight check fail with a missing-configuration error.
        pub fn set_configured(&self, configured: bool) {
            self.configured.store(configured, Ordering::SeqCst);
        }

        /// Number of fetches started.
        pub fn calls(&self) -> usize {
            lock(&self.calls).len()
        }

        pub fn calls_for(&self, scope: &S) -> usize {
            lock(&self.calls).iter().filter(|called| *called == scope).count()
        }

        /// Number of fetches that ran to completion without being cancelled.
        pub fn completed(&self) -> usize {
            self.completed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<S, R> PullFetch<S, R> for ScriptedFetcher<S, R>
    where
        S: Clone + Eq + Hash + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
    {
        fn preflight(&self) -> Result<(), RawError> {
            if self.configured.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(RawError::not_configured("scripted fetcher is not configured"))
            }
        }

        async fn fetch(&self, scope: &S, cancel: CancellationToken) -> Result<Vec<R>, RawError> {
            lock(&self.calls).push(scope.clone());
            let script = lock(&self.scripts).get(scope).cloned();
            let Some(script) = script else {
                self.completed.fetch_add(1, Ordering::SeqCst);
                return Ok(Vec::new());
            };
            if !script.delay.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => return Err(RawError::new("cancelled")),
                    () = tokio::time::sleep(script.delay) => {}
                }
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            script.result
        }
    }

    struct OpenedSink<S> {
        scope: S,
        sink: PushSink<S>,
    }

    /// Push channel that records subscriptions and lets tests drive them.
    pub struct MockPushChannel<S> {
        sinks: Mutex<Vec<OpenedSink<S>>>,
        closed: Arc<Mutex<Vec<S>>>,
        fail_opens: AtomicUsize,
    }

    impl<S> Default for MockPushChannel<S> {
        fn default() -> Self {
            Self {
                sinks: Mutex::new(Vec::new()),
                closed: Arc::new(Mutex::new(Vec::new())),
                fail_opens: AtomicUsize::new(0),
            }
        }
    }

    impl<S: Clone + PartialEq> MockPushChannel<S> {
        pub fn new() -> Self {
            Self::default()
        }

        /// Reject the next `count` opens.
        pub fn fail_next_opens(&self, count: usize) {
            self.fail_opens.store(count, Ordering::SeqCst);
        }

        /// Scopes of every subscription opened so far, in order.
        pub fn opened(&self) -> Vec<S> {
            lock(&self.sinks).iter().map(|opened| opened.scope.clone()).collect()
        }

        /// Scopes of every subscription closed so far, in order.
        pub fn closed(&self) -> Vec<S> {
            lock(&self.closed).clone()
        }

        pub fn open_count(&self) -> usize {
            lock(&self.sinks).len()
        }

        /// Subscriptions opened and not yet closed.
        pub fn active_count(&self) -> usize {
            self.open_count() - lock(&self.closed).len()
        }

        /// Emit through the most recently opened subscription.
        pub fn emit(&self, scope: S, kind: ChangeKind) -> bool {
            self.emit_on(self.open_count().saturating_sub(1), scope, kind)
        }

        /// Emit through the `index`-th subscription ever opened.
        pub fn emit_on(&self, index: usize, scope: S, kind: ChangeKind) -> bool {
            lock(&self.sinks)
                .get(index)
                .is_some_and(|opened| opened.sink.emit(PushEvent::new(scope, kind)))
        }

        /// Report the latest subscription as connected.
        pub fn connect_latest(&self) -> bool {
            lock(&self.sinks)
                .last()
                .is_some_and(|opened| opened.sink.connected())
        }

        /// Report the latest subscription as closed by the remote side.
        pub fn drop_latest(&self, reason: &str) -> bool {
            lock(&self.sinks)
                .last()
                .is_some_and(|opened| opened.sink.closed(reason))
        }
    }

    struct MockSubscription<S> {
        scope: S,
        closed: Arc<Mutex<Vec<S>>>,
    }

    impl<S: Send> Subscription for MockSubscription<S> {
        fn close(self: Box<Self>) {
            let Self { scope, closed } = *self;
            lock(&closed).push(scope);
        }
    }

    impl<S> PushChannel<S> for MockPushChannel<S>
    where
        S: Clone + PartialEq + Send + Sync + 'static,
    {
        fn open(&self, scope: &S, sink: PushSink<S>) -> Result<Box<dyn Subscription>, RawError> {
            let failing = self
                .fail_opens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(RawError::new("channel unavailable"));
            }
            lock(&self.sinks).push(OpenedSink {
                scope: scope.clone(),
                sink,
            });
            Ok(Box::new(MockSubscription {
                scope: scope.clone(),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    /// Mutation backend echoing its input and recording every call.
    pub struct RecordingMutations<R> {
        calls: Mutex<Vec<(MutationKind, R)>>,
        reject_with: Mutex<Option<RawError>>,
    }

    impl<R> Default for RecordingMutations<R> {
        fn default() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                reject_with: Mutex::new(None),
            }
        }
    }

    impl<R: Clone> RecordingMutations<R> {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail every following call with `error`.
        pub fn reject_with(&self, error: RawError) {
            *lock(&self.reject_with) = Some(error);
        }

        pub fn calls(&self) -> Vec<(MutationKind, R)> {
            lock(&self.calls).clone()
        }
    }

    #[async_trait]
    impl<R> MutationBackend<R, R> for RecordingMutations<R>
    where
        R: Clone + Send + Sync + 'static,
    {
        async fn mutate(&self, kind: MutationKind, input: R) -> Result<R, RawError> {
            lock(&self.calls).push((kind, input.clone()));
            match lock(&self.reject_with).clone() {
                Some(error) => Err(error),
                None => Ok(input),
            }
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Estate ids and records.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_agency_id() -> impl Strategy<Value = AgencyId> {
        arb_uuid().prop_map(AgencyId::new)
    }

    pub fn arb_property_id() -> impl Strategy<Value = PropertyId> {
        arb_uuid().prop_map(PropertyId::new)
    }

    pub fn arb_owner_id() -> impl Strategy<Value = OwnerId> {
        arb_uuid().prop_map(OwnerId::new)
    }

    /// Generate a Timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64)
            .prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    pub fn arb_property_kind() -> impl Strategy<Value = PropertyKind> {
        prop_oneof![
            Just(PropertyKind::Apartment),
            Just(PropertyKind::House),
            Just(PropertyKind::Commercial),
            Just(PropertyKind::Land),
            Just(PropertyKind::Parking),
        ]
    }

    pub fn arb_property_status() -> impl Strategy<Value = PropertyStatus> {
        prop_oneof![
            Just(PropertyStatus::Available),
            Just(PropertyStatus::Rented),
            Just(PropertyStatus::Sold),
            Just(PropertyStatus::Withdrawn),
        ]
    }

    /// Generate a property owned by `agency_id`.
    pub fn arb_property(agency_id: AgencyId) -> impl Strategy<Value = Property> {
        (
            arb_property_id(),
            proptest::option::of(arb_owner_id()),
            "[A-Z]{2}-[0-9]{4}",
            "[a-z ]{5,30}",
            arb_property_kind(),
            arb_property_status(),
            proptest::option::of(10_000i64..1_000_000),
            arb_timestamp(),
        )
            .prop_map(
                move |(property_id, owner_id, reference, address, kind, status, rent, created_at)| {
                    Property {
                        property_id,
                        agency_id,
                        owner_id,
                        reference,
                        address,
                        kind,
                        status,
                        monthly_rent_cents: rent,
                        created_at,
                        updated_at: created_at,
                        metadata: None,
                    }
                },
            )
    }

    /// Generate up to `max` properties of one agency.
    pub fn arb_properties(agency_id: AgencyId, max: usize) -> impl Strategy<Value = Vec<Property>> {
        proptest::collection::vec(arb_property(agency_id), 0..=max)
    }

    /// Generate a raw backend error with an arbitrary status, code and message.
    pub fn arb_raw_error() -> impl Strategy<Value = RawError> {
        (
            proptest::option::of(prop_oneof![
                Just(400u16),
                Just(401),
                Just(403),
                Just(404),
                Just(500)
            ]),
            proptest::option::of(prop_oneof![
                Just("42501".to_string()),
                Just("PGRST301".to_string()),
                Just("CONFIG_MISSING".to_string()),
                "[0-9A-Z]{5}",
            ]),
            ".{0,60}",
        )
            .prop_map(|(status, code, message)| RawError {
                status,
                code,
                message,
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Deterministic records and configs for scenario tests.

    use super::*;
    use estate_sync::{ReconnectConfig, WatchConfig};
    use std::time::Duration;

    /// A fixed point in time, so records built twice compare equal.
    pub fn fixed_time() -> Timestamp {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_else(Utc::now)
    }

    /// Agency number `n`, stable across calls.
    pub fn agency(n: u128) -> AgencyId {
        AgencyId::new(Uuid::from_u128(0xA6E0_0000_0000_0000_0000_0000_0000_0000 | n))
    }

    /// Property number `n` of `agency_id`, stable across calls.
    pub fn property(agency_id: AgencyId, n: u128) -> Property {
        let now = fixed_time();
        Property {
            property_id: PropertyId::new(Uuid::from_u128(
                (agency_id.as_uuid().as_u128() << 16) | n,
            )),
            agency_id,
            owner_id: None,
            reference: format!("REF-{n:04}"),
            address: format!("{n} Harbour Street"),
            kind: PropertyKind::Apartment,
            status: PropertyStatus::Available,
            monthly_rent_cents: Some(95_000),
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    /// Properties `1..=count` of `agency_id`.
    pub fn properties(agency_id: AgencyId, count: u128) -> Vec<Property> {
        (1..=count).map(|n| property(agency_id, n)).collect()
    }

    pub fn owner(agency_id: AgencyId, n: u128) -> Owner {
        let now = fixed_time();
        Owner {
            owner_id: OwnerId::new(Uuid::from_u128((agency_id.as_uuid().as_u128() << 8) | n)),
            agency_id,
            full_name: format!("Owner {n}"),
            email: Some(format!("owner{n}@example.com")),
            phone: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Default sync tuning with jitter removed, for predictable timings.
    pub fn sync_config() -> SyncConfig {
        SyncConfig::default().with_reconnect(ReconnectConfig {
            initial_ms: 250,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter_ms: 0,
        })
    }

    pub fn sync_config_with_window(window_ms: u64) -> SyncConfig {
        sync_config().with_debounce_window(Duration::from_millis(window_ms))
    }

    /// A valid `estate-watch` configuration file body.
    pub fn watch_config_toml(agency_id: AgencyId) -> String {
        format!(
            r#"api_base_url = "http://localhost:3000"
ws_endpoint = "ws://localhost:3000/ws"
agency_id = "{agency_id}"
collection = "properties"
request_timeout_ms = 5000

[auth]
api_key = "test-key"

[sync]
debounce_window_ms = 1500
"#
        )
    }

    /// Parsed form of [`watch_config_toml`].
    pub fn watch_config(agency_id: AgencyId) -> WatchConfig {
        WatchConfig {
            api_base_url: "http://localhost:3000".to_string(),
            ws_endpoint: "ws://localhost:3000/ws".to_string(),
            agency_id,
            collection: "properties".to_string(),
            auth: estate_sync::AuthConfig {
                api_key: Some("test-key".to_string()),
                jwt: None,
            },
            request_timeout_ms: 5_000,
            log_format: estate_sync::LogFormat::Pretty,
            sync: SyncConfig::default().with_debounce_window(Duration::from_millis(1_500)),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over published snapshots.

    use super::*;
    use std::fmt::Debug;

    /// Assert the snapshot is ready with exactly `expected`.
    #[track_caller]
    pub fn assert_ready_with<S: Debug, R: PartialEq + Debug>(
        snapshot: &Snapshot<S, R>,
        expected: &[R],
    ) {
        assert_eq!(snapshot.status, FetchStatus::Ready, "Expected Ready, got: {:?}", snapshot);
        assert!(snapshot.error.is_none(), "Expected no error, got: {:?}", snapshot.error);
        assert_eq!(snapshot.items.as_ref(), expected);
    }

    /// Assert the snapshot failed with `kind` and holds no data.
    #[track_caller]
    pub fn assert_failed_with<S: Debug, R: Debug>(snapshot: &Snapshot<S, R>, kind: ErrorKind) {
        assert_eq!(snapshot.status, FetchStatus::Failed, "Expected Failed, got: {:?}", snapshot);
        match &snapshot.error {
            Some(error) => assert_eq!(error.kind, kind, "Wrong error kind"),
            None => panic!("Expected {:?} error, got none", kind),
        }
        assert!(
            snapshot.items.is_empty(),
            "Failed snapshot still holds {} items",
            snapshot.items.len()
        );
    }

    /// Assert the snapshot is unbound and empty.
    #[track_caller]
    pub fn assert_idle<S: Debug, R: Debug>(snapshot: &Snapshot<S, R>) {
        assert_eq!(snapshot.status, FetchStatus::Idle, "Expected Idle, got: {:?}", snapshot);
        assert!(snapshot.items.is_empty());
        assert!(snapshot.error.is_none());
    }
}
