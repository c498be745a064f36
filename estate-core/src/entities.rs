//! Back-office entity payloads.
//!
//! These are plain data carriers as returned by the remote store. Business
//! rules (rent arithmetic, standing, rankings) live elsewhere.

use crate::identity::{AgencyId, ContractId, OwnerId, PropertyId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Collections exposed by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Property,
    Owner,
    Contract,
}

impl EntityKind {
    /// Path segment / channel name of the collection.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Property => "properties",
            EntityKind::Owner => "owners",
            EntityKind::Contract => "contracts",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// Error returned when a collection name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown collection: {0}")]
pub struct UnknownCollection(pub String);

impl FromStr for EntityKind {
    type Err = UnknownCollection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "properties" | "property" => Ok(EntityKind::Property),
            "owners" | "owner" => Ok(EntityKind::Owner),
            "contracts" | "contract" => Ok(EntityKind::Contract),
            other => Err(UnknownCollection(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Apartment,
    House,
    Commercial,
    Land,
    Parking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyStatus {
    Available,
    Rented,
    Sold,
    Withdrawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    Active,
    Terminated,
    Expired,
}

/// A property listed by an agency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub property_id: PropertyId,
    pub agency_id: AgencyId,
    pub owner_id: Option<OwnerId>,
    pub reference: String,
    pub address: String,
    pub kind: PropertyKind,
    pub status: PropertyStatus,
    /// Monthly rent in cents, when the property is offered for rent.
    pub monthly_rent_cents: Option<i64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub metadata: Option<serde_json::Value>,
}

/// A property owner represented by an agency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub owner_id: OwnerId,
    pub agency_id: AgencyId,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A rental or sale contract over one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: ContractId,
    pub agency_id: AgencyId,
    pub property_id: PropertyId,
    pub owner_id: OwnerId,
    pub status: ContractStatus,
    pub monthly_rent_cents: i64,
    pub starts_at: Timestamp,
    pub ends_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_parses_collection_names() {
        assert_eq!("properties".parse::<EntityKind>(), Ok(EntityKind::Property));
        assert_eq!(" Owners ".parse::<EntityKind>(), Ok(EntityKind::Owner));
        assert_eq!("contract".parse::<EntityKind>(), Ok(EntityKind::Contract));
        assert!("leases".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_entity_kind_display_matches_collection() {
        for kind in [EntityKind::Property, EntityKind::Owner, EntityKind::Contract] {
            assert_eq!(kind.to_string(), kind.collection());
            assert_eq!(kind.collection().parse::<EntityKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ContractStatus::Terminated).unwrap();
        assert_eq!(json, "\"terminated\"");
    }
}
