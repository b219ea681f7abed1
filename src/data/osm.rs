/// OSM ids are kept as the text found in the file so large ids survive untouched.
pub type OsmId = String;

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct RawNode {
    pub id: OsmId,
    pub lat: f64,
    pub lon: f64,
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct RawWay {
    pub id: OsmId,
    pub node_refs: Vec<OsmId>,
    pub tags: Vec<Tag>,
}

impl RawWay {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value.as_str())
    }
}
