//! Property tests for error classification and the equality gate.

use estate_sync::gate::{self, GateDecision};
use estate_sync::{classify, ErrorKind, CONFIG_MISSING_CODE};
use estate_test_utils::fixtures::agency;
use estate_test_utils::generators::{arb_agency_id, arb_properties, arb_raw_error};
use proptest::prelude::*;
use std::sync::Arc;

proptest! {
    #[test]
    fn prop_classify_is_referentially_transparent(raw in arb_raw_error()) {
        prop_assert_eq!(classify(&raw), classify(&raw.clone()));
    }

    #[test]
    fn prop_config_code_always_wins(raw in arb_raw_error()) {
        let raw = raw.with_code(CONFIG_MISSING_CODE);
        prop_assert_eq!(classify(&raw).kind, ErrorKind::ConfigMissing);
    }

    #[test]
    fn prop_user_message_matches_kind(raw in arb_raw_error()) {
        let error = classify(&raw);
        prop_assert_eq!(error.message.as_str(), error.kind.user_message());
        prop_assert_eq!(error.detail.is_some(), error.kind == ErrorKind::Unknown);
    }

    #[test]
    fn prop_gate_keeps_equal_collections(
        items in arb_agency_id().prop_flat_map(|agency_id| arb_properties(agency_id, 6))
    ) {
        let current: gate::Items<_> = Arc::from(items.clone());
        match gate::pass(&current, items) {
            GateDecision::Kept => {}
            GateDecision::Replaced(_) => prop_assert!(false, "equal collection replaced"),
        }
    }

    #[test]
    fn prop_gate_detects_reordering(items in arb_properties(agency(1), 6)) {
        prop_assume!(items.len() > 1 && items.first() != items.last());
        let current: gate::Items<_> = Arc::from(items.clone());
        let mut reversed = items;
        reversed.reverse();
        prop_assert!(gate::pass(&current, reversed).is_changed());
    }
}
