//! Record capabilities required by the synchronization layer.
//!
//! The layer treats records as opaque payloads: it needs a stable identity
//! and structural equality, never business fields.

use crate::entities::{Contract, EntityKind, Owner, Property};
use crate::identity::{AgencyId, ContractId, OwnerId, PropertyId};
use std::fmt::Debug;
use std::hash::Hash;

/// A record with a stable identity that can be compared structurally.
///
/// `PartialEq` must be structural (derived, or equivalent): two records are
/// equal iff all of their fields are equal.
pub trait Record: Clone + PartialEq + Send + Sync + 'static {
    /// Stable identity of the record.
    type Id: Clone + Eq + Hash + Debug + Send + Sync;

    /// Identity of this record.
    fn id(&self) -> Self::Id;
}

/// A record stored in one of the agency-scoped remote collections.
pub trait CollectionRecord: Record {
    /// The collection this record type lives in.
    fn entity_kind() -> EntityKind;

    /// The agency that owns this record.
    fn agency_id(&self) -> AgencyId;
}

/// Insert `record` or replace the record with the same identity, keeping order.
pub fn upsert_by_id<R: Record>(items: &[R], record: R) -> Vec<R> {
    let id = record.id();
    let mut next = items.to_vec();
    match next.iter().position(|item| item.id() == id) {
        Some(index) => next[index] = record,
        None => next.push(record),
    }
    next
}

/// Remove the record with identity `id`, keeping the order of the rest.
pub fn remove_by_id<R: Record>(items: &[R], id: &R::Id) -> Vec<R> {
    items.iter().filter(|item| &item.id() != id).cloned().collect()
}

impl Record for Property {
    type Id = PropertyId;

    fn id(&self) -> PropertyId {
        self.property_id
    }
}

impl CollectionRecord for Property {
    fn entity_kind() -> EntityKind {
        EntityKind::Property
    }

    fn agency_id(&self) -> AgencyId {
        self.agency_id
    }
}

impl Record for Owner {
    type Id = OwnerId;

    fn id(&self) -> OwnerId {
        self.owner_id
    }
}

impl CollectionRecord for Owner {
    fn entity_kind() -> EntityKind {
        EntityKind::Owner
    }

    fn agency_id(&self) -> AgencyId {
        self.agency_id
    }
}

impl Record for Contract {
    type Id = ContractId;

    fn id(&self) -> ContractId {
        self.contract_id
    }
}

impl CollectionRecord for Contract {
    fn entity_kind() -> EntityKind {
        EntityKind::Contract
    }

    fn agency_id(&self) -> AgencyId {
        self.agency_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: u32,
        label: &'static str,
    }

    impl Record for Row {
        type Id = u32;

        fn id(&self) -> u32 {
            self.id
        }
    }

    fn row(id: u32, label: &'static str) -> Row {
        Row { id, label }
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let items = vec![row(1, "a"), row(2, "b"), row(3, "c")];
        let next = upsert_by_id(&items, row(2, "B"));
        assert_eq!(next, vec![row(1, "a"), row(2, "B"), row(3, "c")]);
    }

    #[test]
    fn test_upsert_appends_unknown_id() {
        let items = vec![row(1, "a")];
        let next = upsert_by_id(&items, row(9, "z"));
        assert_eq!(next, vec![row(1, "a"), row(9, "z")]);
    }

    #[test]
    fn test_remove_by_id_keeps_order() {
        let items = vec![row(1, "a"), row(2, "b"), row(3, "c")];
        assert_eq!(remove_by_id(&items, &2), vec![row(1, "a"), row(3, "c")]);
        assert_eq!(remove_by_id(&items, &7), items);
    }

    proptest::proptest! {
        #[test]
        fn prop_upsert_is_idempotent(
            ids in proptest::collection::btree_set(0u32..32, 0..12),
            target in 0u32..32,
        ) {
            let items: Vec<Row> = ids.iter().map(|id| row(*id, "x")).collect();
            let once = upsert_by_id(&items, row(target, "y"));
            let twice = upsert_by_id(&once, row(target, "y"));
            proptest::prop_assert_eq!(&once, &twice);
            proptest::prop_assert_eq!(once.iter().filter(|r| r.id == target).count(), 1);
        }
    }

    #[test]
    fn test_collection_kinds() {
        assert_eq!(Property::entity_kind(), EntityKind::Property);
        assert_eq!(Owner::entity_kind(), EntityKind::Owner);
        assert_eq!(Contract::entity_kind(), EntityKind::Contract);
    }
}
