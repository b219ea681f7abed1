use serde::Serialize;

use super::osm::{OsmId, RawWay};

/// Document handed to the rendering client. Field order here is the field order in the
/// JSON output.
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct OutputDocument {
    pub nodes: Vec<ProjectedNode>,
    pub ways: Vec<FilteredWay>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProjectedNode {
    pub id: OsmId,
    pub x: f64,
    pub y: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FilteredWay {
    pub id: OsmId,
    pub node_refs: Vec<OsmId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<CarDirection>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CarDirection {
    Forward,
    TwoWay,
}

impl From<&RawWay> for CarDirection {
    fn from(value: &RawWay) -> Self {
        match value.tag("oneway") {
            Some("yes") => CarDirection::Forward,
            _ => CarDirection::TwoWay,
        }
    }
}

impl FilteredWay {
    pub fn new(way: &RawWay, with_direction: bool) -> Self {
        FilteredWay {
            id: way.id.clone(),
            node_refs: way.node_refs.clone(),
            direction: with_direction.then(|| way.into()),
        }
    }
}
