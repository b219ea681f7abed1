use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use log::{info, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use rkyv::AlignedVec;
use serde::{Deserialize, Serialize};
use xz::bufread::XzDecoder;

use crate::UserConfig;
use crate::data::OsmExtract;
use crate::data::osm::{RawNode, RawWay, Tag};
use crate::errors::{Error, ErrorKind, Result};

use super::Etl;

pub const ETL_NAME: &str = "parse_osm";
pub const OUTPUT_FILE_NAME: &str = "osm_extract.rkyv";
pub const SOURCE_FILE_NAME: &str = "osm_extract.source.json";

pub type OsmReader = Reader<Box<dyn BufRead>>;

/// Size and modification time of the input an archive was built from. The archive is
/// only reused while the input still matches.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
struct InputFingerprint {
    len: u64,
    modified_secs: u64,
    modified_nanos: u32,
}

impl InputFingerprint {
    fn of(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        let modified = metadata.modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Ok(InputFingerprint {
            len: metadata.len(),
            modified_secs: modified.as_secs(),
            modified_nanos: modified.subsec_nanos(),
        })
    }

    fn read(dir: &Path) -> Option<Self> {
        let file = File::open(dir.join(SOURCE_FILE_NAME)).ok()?;
        serde_json::from_reader(file).ok()
    }
}

/// Reads the .osm (or .osm.xz) extract into an [`OsmExtract`] and stores it as an rkyv
/// archive in the work directory, next to the fingerprint of the input it came from.
/// The archive is reused across runs only when `cache_parsed` is set and the input is
/// unchanged.
pub struct ParseOsmEtl<'a> {
    config: &'a UserConfig,
    fingerprint: Option<InputFingerprint>,
}

fn attribute_text(el: &BytesStart, wanted: &[u8]) -> Result<Option<String>> {
    for attribute_res in el.attributes() {
        let attribute = attribute_res?;
        if attribute.key.as_ref() == wanted {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn required_attribute(el: &BytesStart, wanted: &str, context: &str) -> Result<String> {
    attribute_text(el, wanted.as_bytes())?
        .ok_or_else(|| Error::malformed(format!("{context} is missing the '{wanted}' attribute")))
}

/// Parses a coordinate in degrees. NaN, infinities and values beyond `limit` are
/// rejected, they would otherwise reach the output as `null`.
fn parse_coordinate(value: &str, attribute: &str, node_id: &str, limit: f64) -> Result<f64> {
    let coordinate: f64 = value.trim().parse().map_err(|err| {
        Error::malformed(format!("node {node_id} has unparseable {attribute} '{value}': {err}"))
    })?;
    if !coordinate.is_finite() || coordinate.abs() > limit {
        return Err(Error::malformed(format!(
            "node {node_id} has {attribute} '{value}' outside of [-{limit}, {limit}]"
        )));
    }
    Ok(coordinate)
}

fn parse_node(el: &BytesStart) -> Result<RawNode> {
    let id = required_attribute(el, "id", "node")?;
    let context = format!("node {id}");
    let lat = required_attribute(el, "lat", &context)?;
    let lon = required_attribute(el, "lon", &context)?;

    Ok(RawNode {
        lat: parse_coordinate(&lat, "lat", &id, 90.0)?,
        lon: parse_coordinate(&lon, "lon", &id, 180.0)?,
        id,
    })
}

fn parse_way(el: &BytesStart) -> Result<RawWay> {
    Ok(RawWay {
        id: required_attribute(el, "id", "way")?,
        node_refs: Vec::new(),
        tags: Vec::new(),
    })
}

/// Applies a child element of `<way>` to the way being built. Anything other than
/// `<nd>` and `<tag>` is ignored.
fn parse_way_child(way: &mut RawWay, el: &BytesStart) -> Result<()> {
    let context = format!("way {}", way.id);
    match el.name().as_ref() {
        b"nd" => {
            way.node_refs.push(required_attribute(el, "ref", &context)?);
        },
        b"tag" => {
            let key = required_attribute(el, "k", &context)?;
            let value = required_attribute(el, "v", &context)?;
            way.tags.push(Tag { key, value });
        },
        _ => (),
    }
    Ok(())
}

/// Pulls every `<node>` and `<way>` out of an OSM XML document in document order.
/// Relations, node tags and unknown elements are skipped.
pub fn read_extract<R: BufRead>(reader: &mut Reader<R>) -> Result<OsmExtract> {
    let mut buf = Vec::new();
    let mut extract = OsmExtract::default();
    let mut current_way: Option<RawWay> = None;
    let mut depth: usize = 0;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|err| {
            Error::parse(format!("XML error at byte {}: {err}", reader.buffer_position()))
        })?;
        match event {
            Event::Eof => break,
            Event::Start(e) => {
                depth += 1;
                match e.name().as_ref() {
                    b"node" => extract.nodes.push(parse_node(&e)?),
                    b"way" => current_way = Some(parse_way(&e)?),
                    _ => {
                        if let Some(way) = current_way.as_mut() {
                            parse_way_child(way, &e)?;
                        }
                    },
                }
            },
            Event::Empty(e) => {
                match e.name().as_ref() {
                    b"node" => extract.nodes.push(parse_node(&e)?),
                    b"way" => extract.ways.push(parse_way(&e)?),
                    _ => {
                        if let Some(way) = current_way.as_mut() {
                            parse_way_child(way, &e)?;
                        }
                    },
                }
            },
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if e.name().as_ref() == b"way" {
                    if let Some(way) = current_way.take() {
                        extract.ways.push(way);
                    }
                }
            },
            Event::Text(e) => {
                let text = e.unescape()?;
                if !text.trim().is_empty() {
                    return Err(Error::parse(format!(
                        "Didn't expect to see text in OSM file at byte {}",
                        reader.buffer_position()
                    )));
                }
            },
            Event::CData(_) => {
                return Err(Error::parse("Didn't expect to see CDATA in OSM file"));
            },
            Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => (),
        }
        // nothing borrows from the buffer past this point
        buf.clear();
    }

    if depth != 0 {
        return Err(Error::parse("Document ended before all elements were closed"));
    }

    Ok(extract)
}

/// Reads the archive written by [`ParseOsmEtl`] from `dir`.
pub fn read_cached_extract(dir: &Path) -> Result<OsmExtract> {
    let bytes = fs::read(ParseOsmEtl::output_path(dir))?;
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(&bytes);

    rkyv::from_bytes::<OsmExtract>(&aligned).map_err(|err| {
        Error::new(ErrorKind::Cache, format!("Could not deserialize OSM extract cache: {err}"))
    })
}

impl ParseOsmEtl<'_> {
    fn output_path(dir: &Path) -> PathBuf {
        dir.join(OUTPUT_FILE_NAME)
    }

    fn is_xz(path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "xz")
    }

    fn create_osm_reader(&self) -> Result<OsmReader> {
        let path = &self.config.input_path;
        if !path.try_exists()? {
            return Err(Error::input_not_found(path));
        }
        let file_reader = BufReader::new(File::open(path)?);
        let source: Box<dyn BufRead> = if Self::is_xz(path) {
            Box::new(BufReader::new(XzDecoder::new(file_reader)))
        } else {
            Box::new(file_reader)
        };
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);

        Ok(reader)
    }

    pub fn new(config: &UserConfig) -> ParseOsmEtl {
        ParseOsmEtl {
            config,
            fingerprint: None,
        }
    }
}

impl Etl for ParseOsmEtl<'_> {
    type Input = OsmReader;
    type Output = OsmExtract;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        if !self.config.cache_parsed || !Self::output_path(dir).try_exists()? {
            return Ok(false);
        }
        let Ok(current) = InputFingerprint::of(&self.config.input_path) else {
            return Ok(false);
        };
        Ok(InputFingerprint::read(dir) == Some(current))
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        for path in [Self::output_path(dir), dir.join(SOURCE_FILE_NAME)] {
            if path.try_exists()? {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn extract(&mut self, _dir: &Path) -> Result<Self::Input> {
        let reader = self.create_osm_reader()?;
        self.fingerprint = Some(InputFingerprint::of(&self.config.input_path)?);
        Ok(reader)
    }

    fn transform(&mut self, mut input: Self::Input) -> Result<Self::Output> {
        let extract = read_extract(&mut input)?;
        if extract.nodes.is_empty() {
            warn!(etl_name = self.etl_name(); "Extract contains no nodes");
        }
        info!(etl_name = self.etl_name(), nodes = extract.nodes.len(), ways = extract.ways.len(); "Parsed OSM extract");
        Ok(extract)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        let bytes = rkyv::to_bytes::<_, 256>(&output).map_err(|err| {
            Error::new(ErrorKind::Cache, format!("Could not serialize OSM extract: {err}"))
        })?;
        let mut output_file = File::create(Self::output_path(dir))?;
        output_file.write_all(&bytes)?;

        // written last, an interrupted load never looks like a valid cache
        if let Some(fingerprint) = self.fingerprint {
            serde_json::to_writer(File::create(dir.join(SOURCE_FILE_NAME))?, &fingerprint)?;
        }
        Ok(())
    }
}
