//! Mutations followed by an optimistic patch or a refetch.

use estate_core::{remove_by_id, upsert_by_id, AgencyId, Property, Record};
use estate_sync::{ErrorKind, LiveCollection, Mutation, MutationKind, RawError};
use estate_test_utils::assertions::assert_ready_with;
use estate_test_utils::fixtures::{agency, properties, property, sync_config};
use estate_test_utils::mocks::{MockPushChannel, RecordingMutations, ScriptedFetcher};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_created_record_is_patched_in() {
    let a1 = agency(1);
    let fetcher = Arc::new(ScriptedFetcher::<AgencyId, Property>::new());
    fetcher.respond(a1, properties(a1, 2));
    let channel = Arc::new(MockPushChannel::<AgencyId>::new());
    let live = LiveCollection::new(fetcher, channel, sync_config());
    let binding = live.bind(Some(a1));
    binding.wait_for(|s| s.is_ready()).await.expect("binding closed");

    let backend = Arc::new(RecordingMutations::<Property>::new());
    let mut create = Mutation::new(Arc::clone(&backend), MutationKind::Create);
    let saved = create.execute(property(a1, 3)).await.unwrap();
    assert!(create.success());

    binding.apply_optimistic(move |items| upsert_by_id(items, saved));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_ready_with(&binding.snapshot(), &properties(a1, 3));

    let mut delete = Mutation::new(Arc::clone(&backend), MutationKind::Delete);
    let removed = delete.execute(property(a1, 1)).await.unwrap();
    let id = removed.id();
    binding.apply_optimistic(move |items| remove_by_id(items, &id));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_ready_with(&binding.snapshot(), &[property(a1, 2), property(a1, 3)]);

    let kinds: Vec<_> = backend.calls().into_iter().map(|(kind, _)| kind).collect();
    assert_eq!(kinds, vec![MutationKind::Create, MutationKind::Delete]);
}

#[tokio::test]
async fn test_rejected_mutation_leaves_state_failed() {
    let backend = Arc::new(RecordingMutations::<Property>::new());
    backend.reject_with(RawError::new("forbidden").with_status(403));
    let mut update = Mutation::new(backend, MutationKind::Update);

    let err = update.execute(property(agency(1), 1)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::PermissionDenied);
    assert!(!update.loading());
    assert_eq!(update.error().map(|e| e.kind), Some(ErrorKind::PermissionDenied));
}
