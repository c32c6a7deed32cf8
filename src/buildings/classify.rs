//! Fixed classification tables for the regional building stock.

use polars::prelude::*;

/// Zensus construction-year buckets and their ordinal classes.
pub const ZENSUS_YEAR_CLASSES: &[(&str, i32)] = &[
    ("-1919", 0),
    ("1919-1948", 1),
    ("1949-1978", 2),
    ("1979-1986", 3),
    ("1987-1990", 4),
    ("1991-1995", 5),
    ("1996-2000", 6),
    ("2001-2004", 7),
    ("2005-2008", 8),
    ("2009-", 9),
];

/// Residential building typologies and their size classes.
pub const SIZE_CLASSES: &[(&str, i32)] = &[("SFH", 0), ("TH", 1), ("MFH", 2), ("AB", 3)];

/// Zensus construction bucket mapped onto the nearest TABULA building-stock
/// bucket.
pub const ZENSUS_TO_TABULAR: &[(&str, &str)] = &[
    ("-1919", "<1859"),
    ("1919-1948", "1919-1948"),
    ("1949-1978", "1949-1957"),
    ("1979-1986", "1979-1983"),
    ("1987-1990", "1984-1994"),
    ("1991-1995", "1984-1994"),
    ("1996-2000", "1995-2001"),
    ("2001-2004", "2002-2009"),
    ("2005-2008", "2002-2009"),
    ("2009-", ">2009"),
];

/// TABULA construction-year classes for residential buildings.
pub const TABULAR_RESIDENTIAL_YEAR_CLASSES: &[(&str, i32)] = &[
    ("<1859", 0),
    ("1860-1918", 1),
    ("1919-1948", 2),
    ("1949-1957", 3),
    ("1958-1968", 4),
    ("1969-1978", 5),
    ("1979-1983", 6),
    ("1984-1994", 7),
    ("1995-2001", 8),
    ("2002-2009", 9),
    (">2009", 10),
];

/// TABULA construction-year classes for non-residential buildings.
pub const TABULAR_NON_RESIDENTIAL_YEAR_CLASSES: &[(&str, i32)] = &[
    ("<1918", 0),
    ("1919-1976", 1),
    ("1977-1983", 2),
    ("1984-1994", 3),
    (">1995", 4),
];

/// Internal refurbishment levels mapped onto the simulator's 1-based scale.
pub const REF_LEVEL_TO_UHP: &[(i32, i32)] = &[(0, 1), (1, 2), (2, 3)];

/// Building use categories with their numeric encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildingUse {
    Commercial,
    Industrial,
    Public,
    Residential,
}

impl BuildingUse {
    pub const ALL: [BuildingUse; 4] = [
        BuildingUse::Commercial,
        BuildingUse::Industrial,
        BuildingUse::Public,
        BuildingUse::Residential,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuildingUse::Commercial => "Commercial",
            BuildingUse::Industrial => "Industrial",
            BuildingUse::Public => "Public",
            BuildingUse::Residential => "Residential",
        }
    }

    pub fn code(self) -> i32 {
        match self {
            BuildingUse::Commercial => 0,
            BuildingUse::Industrial => 1,
            BuildingUse::Public => 2,
            BuildingUse::Residential => 3,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|u| u.as_str() == name)
    }
}

/// The four refurbishable building components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefComponent {
    Roof,
    Wall,
    Floor,
    Window,
}

impl RefComponent {
    pub const ALL: [RefComponent; 4] = [
        RefComponent::Roof,
        RefComponent::Wall,
        RefComponent::Floor,
        RefComponent::Window,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RefComponent::Roof => "roof",
            RefComponent::Wall => "wall",
            RefComponent::Floor => "floor",
            RefComponent::Window => "window",
        }
    }

    /// Canonical column name, `ref_level_{name}`.
    pub fn column(self) -> &'static str {
        match self {
            RefComponent::Roof => "ref_level_roof",
            RefComponent::Wall => "ref_level_wall",
            RefComponent::Floor => "ref_level_floor",
            RefComponent::Window => "ref_level_window",
        }
    }

    /// Source-schema spellings recognized for this component. The short
    /// `refurb_` form abbreviates the floor as basement.
    pub fn aliases(self) -> [&'static str; 2] {
        match self {
            RefComponent::Roof => ["ref_roof", "refurb_roo"],
            RefComponent::Wall => ["ref_wall", "refurb_wal"],
            RefComponent::Floor => ["ref_floor", "refurb_bas"],
            RefComponent::Window => ["ref_window", "refurb_win"],
        }
    }
}

/// Map a string column through a lookup table; misses become null.
pub(crate) fn lookup_int(values: &StringChunked, table: &[(&str, i32)]) -> Int32Chunked {
    values
        .into_iter()
        .map(|value| {
            value.and_then(|v| table.iter().find(|(key, _)| *key == v).map(|(_, class)| *class))
        })
        .collect()
}

/// String-to-string variant of [`lookup_int`].
pub(crate) fn lookup_str(values: &StringChunked, table: &[(&str, &'static str)]) -> StringChunked {
    values
        .into_iter()
        .map(|value| {
            value.and_then(|v| table.iter().find(|(key, _)| *key == v).map(|(_, out)| *out))
        })
        .collect()
}
