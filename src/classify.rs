//! Numeric-range classification of opaque entity IDs.
//!
//! The remote API hands out IDs from fixed, non-overlapping ranges per entity
//! family. [`classify`] maps any `u64` to a coarse [`EntityKind`] without any
//! I/O. The `[100_000_000, 2_100_000_000)` band is shared by several entity
//! families and can only be disambiguated remotely, so it classifies as
//! [`EntityKind::Unknown`] and goes through the bulk name lookup instead.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Coarse type tag attached to foreign references.
///
/// [`classify`] only ever produces `Station`, `Character`, `Corporation`,
/// `Alliance`, `Structure` or `Unknown`. The remaining variants come back from
/// the bulk name lookup, which knows about more categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Station,
    Character,
    Corporation,
    Alliance,
    Structure,
    SolarSystem,
    Constellation,
    Region,
    InventoryType,
    Faction,
    MailingList,
    #[default]
    Unknown,
}

impl EntityKind {
    /// Returns the storage / wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Station => "station",
            Self::Character => "character",
            Self::Corporation => "corporation",
            Self::Alliance => "alliance",
            Self::Structure => "structure",
            Self::SolarSystem => "solar_system",
            Self::Constellation => "constellation",
            Self::Region => "region",
            Self::InventoryType => "inventory_type",
            Self::Faction => "faction",
            Self::MailingList => "mailing_list",
            Self::Unknown => "unknown",
        }
    }

    /// Maps a category string from the bulk name lookup (or a remote
    /// `*_type` field) to a kind. Unrecognised categories map to `Unknown`.
    #[must_use]
    pub fn from_category(category: &str) -> Self {
        match category {
            "station" => Self::Station,
            "character" => Self::Character,
            "corporation" => Self::Corporation,
            "alliance" => Self::Alliance,
            "structure" => Self::Structure,
            "solar_system" => Self::SolarSystem,
            "constellation" => Self::Constellation,
            "region" => Self::Region,
            "inventory_type" => Self::InventoryType,
            "faction" => Self::Faction,
            "mailing_list" => Self::MailingList,
            _ => Self::Unknown,
        }
    }

    /// True for every tag other than `Unknown`.
    #[must_use]
    pub fn is_known(&self) -> bool {
        *self != Self::Unknown
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const STATIONS: Range<u64> = 60_000_000..64_000_000;
const CHARACTERS: Range<u64> = 90_000_000..98_000_000;
const CORPORATIONS: Range<u64> = 98_000_000..99_000_000;
const ALLIANCES: Range<u64> = 99_000_000..100_000_000;
const AMBIGUOUS: Range<u64> = 100_000_000..2_100_000_000;
const NEW_CHARACTERS: Range<u64> = 2_100_000_000..1_000_000_000_000;
const STRUCTURES_START: u64 = 1_000_000_000_000;

/// Classifies an ID into a coarse entity kind by numeric range.
///
/// Total over `u64`; ranges are checked in ascending order.
///
/// ```
/// use ingestor_core::classify::{EntityKind, classify};
///
/// assert_eq!(classify(60_003_760), EntityKind::Station);
/// assert_eq!(classify(99_000_001), EntityKind::Alliance);
/// assert_eq!(classify(500_000_000), EntityKind::Unknown);
/// assert_eq!(classify(1_022_734_985_679), EntityKind::Structure);
/// ```
#[must_use]
pub fn classify(id: u64) -> EntityKind {
    if STATIONS.contains(&id) {
        EntityKind::Station
    } else if CHARACTERS.contains(&id) {
        EntityKind::Character
    } else if CORPORATIONS.contains(&id) {
        EntityKind::Corporation
    } else if ALLIANCES.contains(&id) {
        EntityKind::Alliance
    } else if AMBIGUOUS.contains(&id) {
        EntityKind::Unknown
    } else if NEW_CHARACTERS.contains(&id) {
        EntityKind::Character
    } else if id >= STRUCTURES_START {
        EntityKind::Structure
    } else {
        EntityKind::Unknown
    }
}

/// Signed convenience wrapper; the remote API transports IDs as `i64`.
/// Negative values classify as `Unknown`.
#[must_use]
pub fn classify_i64(id: i64) -> EntityKind {
    u64::try_from(id).map_or(EntityKind::Unknown, classify)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_station_bounds() {
        assert_eq!(classify(60_000_000), EntityKind::Station);
        assert_eq!(classify(63_999_999), EntityKind::Station);
        assert_ne!(classify(64_000_000), EntityKind::Station);
        assert_eq!(classify(59_999_999), EntityKind::Unknown);
    }

    #[test]
    fn test_classify_character_corporation_alliance_bounds() {
        assert_eq!(classify(90_000_000), EntityKind::Character);
        assert_eq!(classify(97_999_999), EntityKind::Character);
        assert_eq!(classify(98_000_000), EntityKind::Corporation);
        assert_eq!(classify(98_999_999), EntityKind::Corporation);
        assert_eq!(classify(99_000_000), EntityKind::Alliance);
        assert_eq!(classify(99_999_999), EntityKind::Alliance);
    }

    #[test]
    fn test_classify_ambiguous_band_is_unknown() {
        assert_eq!(classify(100_000_000), EntityKind::Unknown);
        assert_eq!(classify(500_000_000), EntityKind::Unknown);
        assert_eq!(classify(2_099_999_999), EntityKind::Unknown);
    }

    #[test]
    fn test_classify_new_character_and_structure_bounds() {
        assert_eq!(classify(2_100_000_000), EntityKind::Character);
        assert_eq!(classify(999_999_999_999), EntityKind::Character);
        assert_eq!(classify(1_000_000_000_000), EntityKind::Structure);
        assert_eq!(classify(u64::MAX), EntityKind::Structure);
    }

    #[test]
    fn test_classify_gaps_are_unknown() {
        assert_eq!(classify(0), EntityKind::Unknown);
        assert_eq!(classify(30_000_142), EntityKind::Unknown);
        assert_eq!(classify(64_000_000), EntityKind::Unknown);
        assert_eq!(classify(89_999_999), EntityKind::Unknown);
    }

    #[test]
    fn test_classify_ranges_are_disjoint_and_ordered() {
        let ranges = [
            STATIONS,
            CHARACTERS,
            CORPORATIONS,
            ALLIANCES,
            AMBIGUOUS,
            NEW_CHARACTERS,
        ];
        for pair in ranges.windows(2) {
            assert!(
                pair[0].end <= pair[1].start,
                "{:?} overlaps {:?}",
                pair[0],
                pair[1]
            );
        }
        assert!(NEW_CHARACTERS.end <= STRUCTURES_START);
    }

    #[test]
    fn test_classify_only_yields_range_kinds() {
        let probes = [
            0,
            1,
            60_000_000,
            90_000_000,
            98_000_000,
            99_000_000,
            100_000_000,
            2_100_000_000,
            1_000_000_000_000,
            u64::MAX,
        ];
        for id in probes {
            assert!(matches!(
                classify(id),
                EntityKind::Station
                    | EntityKind::Character
                    | EntityKind::Corporation
                    | EntityKind::Alliance
                    | EntityKind::Structure
                    | EntityKind::Unknown
            ));
        }
    }

    #[test]
    fn test_classify_i64_negative_is_unknown() {
        assert_eq!(classify_i64(-1), EntityKind::Unknown);
        assert_eq!(classify_i64(99_050_001), EntityKind::Alliance);
    }

    #[test]
    fn test_entity_kind_category_round_trip() {
        for kind in [
            EntityKind::Station,
            EntityKind::Character,
            EntityKind::Corporation,
            EntityKind::Alliance,
            EntityKind::Structure,
            EntityKind::SolarSystem,
            EntityKind::Constellation,
            EntityKind::Region,
            EntityKind::InventoryType,
            EntityKind::Faction,
            EntityKind::MailingList,
        ] {
            assert_eq!(EntityKind::from_category(kind.as_str()), kind);
        }
        assert_eq!(EntityKind::from_category("planet"), EntityKind::Unknown);
    }
}
