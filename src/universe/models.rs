//! Universe and catalog entities as the remote API returns them.
//!
//! Most single-entity responses do not repeat their own id, so `id` defaults
//! to zero on decode and is filled in by the lookup that fetched it. Where the
//! payload does carry it (`station_id`, `type_id`, ...) the alias picks it up.

use serde::{Deserialize, Serialize};

use crate::classify::EntityKind;
use crate::endpoint::Endpoint;
use crate::store::Entity;

/// An entity with a typed remote lookup.
pub trait Lookup: Entity {
    /// Endpoint serving a single entity by id.
    const ENDPOINT: Endpoint;

    /// Whether the lookup must be authenticated as a member.
    const NEEDS_MEMBER: bool = false;

    /// Sets the id after decoding a payload that did not carry it.
    fn assign_id(&mut self, id: i64);
}

macro_rules! entity {
    ($ty:ty, $kind:literal) => {
        impl Entity for $ty {
            const KIND: &'static str = $kind;

            fn id(&self) -> i64 {
                self.id
            }
        }
    };
    ($ty:ty, $kind:literal, $endpoint:expr) => {
        entity!($ty, $kind);

        impl Lookup for $ty {
            const ENDPOINT: Endpoint = $endpoint;

            fn assign_id(&mut self, id: i64) {
                self.id = id;
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    #[serde(default, alias = "character_id")]
    pub id: i64,
    pub name: String,
    pub corporation_id: i64,
    #[serde(default)]
    pub alliance_id: Option<i64>,
    #[serde(default)]
    pub security_status: Option<f64>,
}
entity!(Character, "character", Endpoint::Character);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corporation {
    #[serde(default, alias = "corporation_id")]
    pub id: i64,
    pub name: String,
    pub ticker: String,
    #[serde(default)]
    pub member_count: i64,
    #[serde(default)]
    pub alliance_id: Option<i64>,
}
entity!(Corporation, "corporation", Endpoint::Corporation);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alliance {
    #[serde(default, alias = "alliance_id")]
    pub id: i64,
    pub name: String,
    pub ticker: String,
    #[serde(default)]
    pub executor_corporation_id: Option<i64>,
}
entity!(Alliance, "alliance", Endpoint::Alliance);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    #[serde(default, alias = "station_id")]
    pub id: i64,
    pub name: String,
    pub system_id: i64,
    pub type_id: i64,
    #[serde(default)]
    pub owner: Option<i64>,
}
entity!(Station, "station", Endpoint::Station);

/// Player-owned structure; only visible to members with docking access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    #[serde(default, alias = "structure_id")]
    pub id: i64,
    pub name: String,
    pub solar_system_id: i64,
    #[serde(default)]
    pub type_id: Option<i64>,
    pub owner_id: i64,
}

impl Entity for Structure {
    const KIND: &'static str = "structure";

    fn id(&self) -> i64 {
        self.id
    }
}

impl Lookup for Structure {
    const ENDPOINT: Endpoint = Endpoint::Structure;
    const NEEDS_MEMBER: bool = true;

    fn assign_id(&mut self, id: i64) {
        self.id = id;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarSystem {
    #[serde(default, alias = "system_id")]
    pub id: i64,
    pub name: String,
    pub constellation_id: i64,
    #[serde(default)]
    pub security_status: f64,
    #[serde(default)]
    pub star_id: Option<i64>,
}
entity!(SolarSystem, "solar_system", Endpoint::SolarSystem);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constellation {
    #[serde(default, alias = "constellation_id")]
    pub id: i64,
    pub name: String,
    pub region_id: i64,
    /// Child ids; emptied once the catalog walk has imported them.
    #[serde(default)]
    pub systems: Vec<i64>,
}
entity!(Constellation, "constellation", Endpoint::Constellation);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(default, alias = "region_id")]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Child ids; emptied once the catalog walk has imported them.
    #[serde(default)]
    pub constellations: Vec<i64>,
}
entity!(Region, "region", Endpoint::Region);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default, alias = "category_id")]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub published: bool,
    /// Child ids; emptied once the catalog walk has imported them.
    #[serde(default)]
    pub groups: Vec<i64>,
}
entity!(Category, "category", Endpoint::Category);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default, alias = "group_id")]
    pub id: i64,
    pub name: String,
    pub category_id: i64,
    #[serde(default)]
    pub published: bool,
    /// Child ids; emptied once the catalog walk has imported them.
    #[serde(default)]
    pub types: Vec<i64>,
}
entity!(Group, "group", Endpoint::Group);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemType {
    #[serde(default, alias = "type_id")]
    pub id: i64,
    pub name: String,
    pub group_id: i64,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub volume: Option<f64>,
}
entity!(ItemType, "inventory_type", Endpoint::ItemType);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Race {
    #[serde(alias = "race_id")]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub alliance_id: Option<i64>,
}
entity!(Race, "race");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bloodline {
    #[serde(alias = "bloodline_id")]
    pub id: i64,
    pub name: String,
    pub race_id: i64,
    #[serde(default)]
    pub description: String,
}
entity!(Bloodline, "bloodline");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ancestry {
    pub id: i64,
    pub name: String,
    pub bloodline_id: i64,
    #[serde(default)]
    pub description: String,
}
entity!(Ancestry, "ancestry");

/// One answer of the bulk name lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEntry {
    pub id: i64,
    pub name: String,
    pub category: String,
}
entity!(NameEntry, "name");

impl NameEntry {
    /// The category as an [`EntityKind`].
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        EntityKind::from_category(&self.category)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_station_decodes_aliased_id() {
        let station: Station = serde_json::from_str(
            r#"{"station_id":60003760,"name":"Jita IV - Moon 4","system_id":30000142,"type_id":52678}"#,
        )
        .unwrap();
        assert_eq!(station.id, 60_003_760);
        assert_eq!(station.owner, None);

        let stored = serde_json::to_value(&station).unwrap();
        assert_eq!(stored["id"], 60_003_760);
    }

    #[test]
    fn test_character_without_id_defaults_to_zero() {
        let mut character: Character =
            serde_json::from_str(r#"{"name":"Pilot","corporation_id":98000001}"#).unwrap();
        assert_eq!(character.id, 0);
        character.assign_id(90_000_001);
        assert_eq!(Entity::id(&character), 90_000_001);
    }

    #[test]
    fn test_structure_lookup_needs_member() {
        const { assert!(<Structure as Lookup>::NEEDS_MEMBER) };
        const { assert!(!<Station as Lookup>::NEEDS_MEMBER) };
    }

    #[test]
    fn test_name_entry_kind() {
        let entry = NameEntry {
            id: 500_000_000,
            name: "Some Corp".to_string(),
            category: "corporation".to_string(),
        };
        assert_eq!(entry.kind(), EntityKind::Corporation);
    }

    #[test]
    fn test_group_children_default_empty() {
        let group: Group =
            serde_json::from_str(r#"{"group_id":25,"name":"Frigate","category_id":6}"#).unwrap();
        assert!(group.types.is_empty());
        assert!(!group.published);
    }
}
