use self::osm::{RawNode, RawWay};

pub mod osm;
pub mod road;

/// Nodes and ways as read from the .osm file, both in document order. Relations and
/// node tags are discarded, everything else is kept without any processing.

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct OsmExtract {
    pub nodes: Vec<RawNode>,
    pub ways: Vec<RawWay>,
}
