use std::collections::BTreeSet;

use crate::data::osm::Tag;

/// `highway` values that are not drivable through-roads: foot and cycle paths, tracks,
/// unbuilt roads, platforms, raceways and similar guideways.
pub const DEFAULT_HIGHWAY_BLACKLIST: &[&str] = &[
    "pedestrian",
    "footway",
    "steps",
    "path",
    "cycleway",
    "proposed",
    "construction",
    "bridleway",
    "bridlway",
    "abandoned",
    "platform",
    "raceway",
    "service",
    "services",
    "rest_area",
    "escape",
    "busway",
    "corridor",
    "via_ferreta",
    "sidewalk",
    "crossing",
    "track",
];

/// Decides which ways are kept as roads. A way is a road if it has a `highway` tag whose
/// value is not blacklisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoadFilter {
    blacklist: BTreeSet<String>,
}

impl Default for RoadFilter {
    fn default() -> Self {
        RoadFilter::new(DEFAULT_HIGHWAY_BLACKLIST.iter().copied())
    }
}

impl RoadFilter {
    pub fn new<I, S>(blacklist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RoadFilter {
            blacklist: blacklist.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_excluded(mut self, highway_value: impl Into<String>) -> Self {
        self.blacklist.insert(highway_value.into());
        self
    }

    pub fn is_excluded(&self, highway_value: &str) -> bool {
        self.blacklist.contains(highway_value)
    }

    pub fn is_road(&self, tags: &[Tag]) -> bool {
        tags.iter()
            .any(|tag| tag.key == "highway" && !self.is_excluded(&tag.value))
    }
}
