//! Estate Core - Identity and Record Types
//!
//! Pure data structures shared by every Estate crate. This crate contains no
//! I/O and no business logic.

pub mod entities;
pub mod identity;
pub mod record;

pub use entities::{
    Contract, ContractStatus, EntityKind, Owner, Property, PropertyKind, PropertyStatus,
    UnknownCollection,
};
pub use identity::{
    new_entity_id, AgencyId, ContractId, EntityId, EntityIdType, OwnerId, PropertyId, Timestamp,
};
pub use record::{remove_by_id, upsert_by_id, CollectionRecord, Record};
