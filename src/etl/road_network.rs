use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use crate::UserConfig;
use crate::data::OsmExtract;
use crate::data::road::{FilteredWay, OutputDocument, ProjectedNode};
use crate::errors::{Error, ErrorKind, Result};
use crate::projection::{resolve_origin, ProjectionKind};
use crate::road_filter::RoadFilter;

use super::{parse_osm, Etl};

pub const ETL_NAME: &str = "road_network";

#[derive(Debug, Clone, Default)]
pub struct RoadNetworkSettings {
    pub projection: ProjectionKind,
    pub filter: RoadFilter,
    pub include_direction: bool,
    pub prune_unreferenced_nodes: bool,
    pub validate_node_refs: bool,
}

impl From<&UserConfig> for RoadNetworkSettings {
    fn from(value: &UserConfig) -> Self {
        RoadNetworkSettings {
            projection: value.projection,
            filter: value.road_filter(),
            include_direction: value.include_direction,
            prune_unreferenced_nodes: value.prune_unreferenced_nodes,
            validate_node_refs: value.validate_node_refs,
        }
    }
}

/// Projects every node relative to the first one and keeps the ways that are roads.
/// Input order is kept for both collections.
pub fn build_road_network(extract: &OsmExtract, settings: &RoadNetworkSettings) -> Result<OutputDocument> {
    let origin = resolve_origin(&extract.nodes)?;
    let projection = settings.projection.for_origin(origin);

    let ways: Vec<FilteredWay> = extract.ways.iter()
        .filter(|way| settings.filter.is_road(&way.tags))
        .map(|way| FilteredWay::new(way, settings.include_direction))
        .collect();

    if settings.validate_node_refs {
        let known: HashSet<&str> = extract.nodes.iter().map(|node| node.id.as_str()).collect();
        for way in &ways {
            if let Some(missing) = way.node_refs.iter().find(|node_ref| !known.contains(node_ref.as_str())) {
                return Err(Error::new(
                    ErrorKind::DanglingNodeRef,
                    format!("way {} references node {} which is not in the extract", way.id, missing),
                ));
            }
        }
    }

    let referenced: Option<HashSet<&str>> = settings.prune_unreferenced_nodes.then(|| {
        ways.iter()
            .flat_map(|way| way.node_refs.iter().map(String::as_str))
            .collect()
    });

    let nodes: Vec<ProjectedNode> = extract.nodes.iter()
        .filter(|node| referenced.as_ref().map_or(true, |keep| keep.contains(node.id.as_str())))
        .map(|node| {
            let (x, y) = projection.project(node.lat, node.lon);
            ProjectedNode { id: node.id.clone(), x, y }
        })
        .collect();

    Ok(OutputDocument { nodes, ways })
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let file_name = path.file_name()
        .ok_or_else(|| Error::new(ErrorKind::Config, format!("Output path {} has no file name", path.display())))?;
    let mut temp_name = OsString::from(file_name);
    temp_name.push(".tmp");
    Ok(path.with_file_name(temp_name))
}

/// Serializes the whole document next to `path` first and renames it into place, so
/// `path` either holds a complete document or is left untouched.
pub fn write_document(path: &Path, document: &OutputDocument) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp = temp_path(path)?;
    let mut writer = BufWriter::new(File::create(&temp)?);
    {
        let mut serializer = serde_json::Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(b"    "));
        document.serialize(&mut serializer)?;
    }
    writer.write_all(b"\n")?;
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;

    fs::rename(&temp, path)?;
    Ok(())
}

pub struct RoadNetworkEtl<'a> {
    config: &'a UserConfig,
    settings: RoadNetworkSettings,
}

impl RoadNetworkEtl<'_> {
    pub fn new(config: &UserConfig) -> RoadNetworkEtl {
        RoadNetworkEtl {
            config,
            settings: config.into(),
        }
    }
}

impl Etl for RoadNetworkEtl<'_> {
    type Input = OsmExtract;
    type Output = OutputDocument;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    /// The output is rebuilt on every run.
    fn is_cached(&self, _dir: &Path) -> Result<bool> {
        Ok(false)
    }

    fn clean(&self, _dir: &Path) -> Result<()> {
        let temp = temp_path(&self.config.output_path)?;
        if temp.try_exists()? {
            fs::remove_file(temp)?;
        }
        Ok(())
    }

    fn extract(&mut self, dir: &Path) -> Result<Self::Input> {
        parse_osm::read_cached_extract(dir)
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let output = build_road_network(&input, &self.settings)?;
        info!(
            etl_name = self.etl_name(),
            nodes = output.nodes.len(),
            ways = output.ways.len(),
            dropped_ways = input.ways.len() - output.ways.len();
            "Built road network"
        );
        Ok(output)
    }

    fn load(&mut self, _dir: &Path, output: Self::Output) -> Result<()> {
        write_document(&self.config.output_path, &output)
    }
}
