mod etl;
mod data;
mod errors;
mod projection;
mod road_filter;

use std::env;
use std::fs::{self, create_dir_all, File};
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Deserialize;
use structured_logger::json::new_writer;
use structured_logger::Builder;

use crate::etl::parse_osm::ParseOsmEtl;
use crate::etl::road_network::RoadNetworkEtl;
use crate::etl::Etl;
use crate::errors::{Error, ErrorKind, Result};
use crate::projection::ProjectionKind;
use crate::road_filter::RoadFilter;

const DEFAULT_CONFIG_PATH: &str = "config/default.json";

#[derive(Deserialize, Debug, Clone)]
pub struct UserConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub projection: ProjectionKind,
    /// Replaces the built-in blacklist when present.
    #[serde(default)]
    pub highway_blacklist: Option<Vec<String>>,
    /// Added on top of whichever blacklist is in effect.
    #[serde(default)]
    pub extra_excluded_highways: Vec<String>,
    #[serde(default)]
    pub include_direction: bool,
    #[serde(default)]
    pub prune_unreferenced_nodes: bool,
    #[serde(default)]
    pub validate_node_refs: bool,
    #[serde(default)]
    pub cache_parsed: bool,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("output")
}

impl UserConfig {
    pub fn new(input_path: PathBuf, output_path: PathBuf) -> Self {
        UserConfig {
            input_path,
            output_path,
            work_dir: default_work_dir(),
            projection: ProjectionKind::default(),
            highway_blacklist: None,
            extra_excluded_highways: Vec::new(),
            include_direction: false,
            prune_unreferenced_nodes: false,
            validate_node_refs: false,
            cache_parsed: false,
        }
    }

    pub fn road_filter(&self) -> RoadFilter {
        let base = match &self.highway_blacklist {
            Some(blacklist) => RoadFilter::new(blacklist.iter().cloned()),
            None => RoadFilter::default(),
        };
        self.extra_excluded_highways.iter()
            .fold(base, |filter, value| filter.with_excluded(value.as_str()))
    }
}

fn load_user_config(path: &Path) -> Result<UserConfig> {
    let file = File::open(path).map_err(|err| {
        Error::new(ErrorKind::Config, format!("Could not open config file {}: {err}", path.display()))
    })?;
    serde_json::from_reader(file).map_err(|err| {
        Error::new(ErrorKind::Config, format!("Could not parse config {}: {err}", path.display()))
    })
}

/// Intermediate files for one input live in `<work_dir>/<input file name>/`.
fn create_work_dir(config: &UserConfig) -> Result<PathBuf> {
    let input_fname = config.input_path
        .file_name()
        .ok_or_else(|| Error::new(ErrorKind::Config, "Could not get input file name"))?;
    let work_dir = config.work_dir.join(input_fname);
    create_dir_all(&work_dir)?;
    Ok(work_dir)
}

/// Drops the intermediate archive and, once nothing else is left in it, the per-input
/// work directory.
fn clean_work_dir(parse_etl: &ParseOsmEtl, work_dir: &Path) -> Result<()> {
    parse_etl.clean(work_dir)?;
    if work_dir.read_dir()?.next().is_none() {
        fs::remove_dir(work_dir)?;
    }
    Ok(())
}

fn setup_logging() {
    Builder::with_level("info")
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

/// Parses the extract, then builds and writes the road network. Nothing is written to
/// the output path unless every step succeeds.
pub fn run(config: &UserConfig) -> Result<()> {
    let work_dir = create_work_dir(config)?;

    let mut parse_etl = ParseOsmEtl::new(config);
    let result = parse_etl.process(&work_dir)
        .and_then(|_| RoadNetworkEtl::new(config).process(&work_dir));

    // a cleanup failure must not hide why the run failed
    if !config.cache_parsed {
        if let Err(err) = clean_work_dir(&parse_etl, &work_dir) {
            warn!(err = err.message.as_str(); "Could not clean up work directory");
        }
    }
    result
}

fn main() -> Result<()> {
    setup_logging();

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let user_config = load_user_config(&config_path)?;
    run(&user_config)?;

    let output = user_config.output_path.display().to_string();
    info!(output = output.as_str(); "Road network written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::data::OsmExtract;
    use crate::data::osm::RawNode;

    const TWO_NODES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <node id="1" lat="55.0" lon="10.0"/>
  <node id="2" lat="55.001" lon="10.001"/>
  <way id="10">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="tertiary"/>
  </way>
  <way id="11">
    <nd ref="2"/>
    <nd ref="1"/>
    <tag k="highway" v="steps"/>
  </way>
</osm>
"#;

    fn setup(xml: &str) -> (tempfile::TempDir, UserConfig) {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("island.osm");
        fs::write(&input_path, xml).unwrap();
        let config = UserConfig {
            work_dir: dir.path().join("work"),
            ..UserConfig::new(input_path, dir.path().join("island.json"))
        };
        (dir, config)
    }

    #[test]
    fn config_defaults() {
        let config: UserConfig = serde_json::from_str(
            r#"{"input_path": "maps/tuno.osm", "output_path": "maps/tuno.json"}"#
        ).unwrap();
        assert_eq!(config.work_dir, PathBuf::from("output"));
        assert_eq!(config.projection, ProjectionKind::Utm);
        assert_eq!(config.road_filter(), RoadFilter::default());
        assert!(!config.cache_parsed && !config.validate_node_refs);
    }

    #[test]
    fn config_blacklist_override_and_extension() {
        let config: UserConfig = serde_json::from_str(r#"{
            "input_path": "a.osm",
            "output_path": "a.json",
            "projection": "haversine",
            "highway_blacklist": ["footway"],
            "extra_excluded_highways": ["residential"]
        }"#).unwrap();
        assert_eq!(config.projection, ProjectionKind::Haversine);
        assert_eq!(config.road_filter(), RoadFilter::new(["footway", "residential"]));
    }

    #[test]
    fn missing_config_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_user_config(&dir.path().join("missing.json")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn end_to_end() {
        let (_dir, config) = setup(TWO_NODES);
        run(&config).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&config.output_path).unwrap()).unwrap();
        assert_eq!(value["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(value["nodes"][0], serde_json::json!({"id": "1", "x": 0.0, "y": 0.0}));
        assert_eq!(value["ways"], serde_json::json!([{"id": "10", "node_refs": ["1", "2"]}]));

        // intermediate cache is removed unless caching was asked for
        let work_dir = config.work_dir.join("island.osm");
        assert!(!work_dir.join(etl::parse_osm::OUTPUT_FILE_NAME).exists());
    }

    #[test]
    fn repeated_runs_are_byte_identical() {
        let (_dir, config) = setup(TWO_NODES);
        run(&config).unwrap();
        let first = fs::read(&config.output_path).unwrap();
        run(&config).unwrap();
        let second = fs::read(&config.output_path).unwrap();
        assert_eq!(first, second);
    }

    fn output_node_count(config: &UserConfig) -> usize {
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&config.output_path).unwrap()).unwrap();
        value["nodes"].as_array().unwrap().len()
    }

    #[test]
    fn cached_extract_is_reused_while_input_is_unchanged() {
        let (_dir, mut config) = setup(TWO_NODES);
        config.cache_parsed = true;
        run(&config).unwrap();
        assert_eq!(output_node_count(&config), 2);

        // swap the archive behind the pipeline's back, a reused cache shows up in the output
        let planted = OsmExtract {
            nodes: vec![RawNode { id: "77".to_string(), lat: 55.0, lon: 10.0 }],
            ways: Vec::new(),
        };
        let work_dir = config.work_dir.join("island.osm");
        let bytes = rkyv::to_bytes::<_, 256>(&planted).unwrap();
        fs::write(work_dir.join(etl::parse_osm::OUTPUT_FILE_NAME), &bytes).unwrap();

        run(&config).unwrap();
        assert_eq!(output_node_count(&config), 1);
    }

    #[test]
    fn changed_input_is_parsed_again() {
        let (_dir, mut config) = setup(TWO_NODES);
        config.cache_parsed = true;
        run(&config).unwrap();
        assert_eq!(output_node_count(&config), 2);

        let grown = TWO_NODES.replace(
            r#"<node id="2" lat="55.001" lon="10.001"/>"#,
            r#"<node id="2" lat="55.001" lon="10.001"/>
  <node id="3" lat="55.002" lon="10.002"/>"#,
        );
        fs::write(&config.input_path, grown).unwrap();
        run(&config).unwrap();
        assert_eq!(output_node_count(&config), 3);
    }

    #[test]
    fn work_dir_is_removed_without_caching() {
        let (_dir, config) = setup(TWO_NODES);
        run(&config).unwrap();
        assert!(!config.work_dir.join("island.osm").exists());

        let (_dir, config) = setup("<osm></osm>");
        assert!(run(&config).is_err());
        assert!(!config.work_dir.join("island.osm").exists());
    }

    #[test]
    fn work_dir_with_foreign_files_is_kept() {
        let (_dir, config) = setup(TWO_NODES);
        let work_dir = config.work_dir.join("island.osm");
        fs::create_dir_all(&work_dir).unwrap();
        fs::write(work_dir.join("notes.txt"), "keep me").unwrap();

        run(&config).unwrap();
        assert!(work_dir.join("notes.txt").exists());
        assert!(!work_dir.join(etl::parse_osm::OUTPUT_FILE_NAME).exists());
    }

    #[test]
    fn cleanup_failure_keeps_the_original_error() {
        let (_dir, config) = setup(TWO_NODES);
        fs::remove_file(&config.input_path).unwrap();
        // a directory where the fingerprint goes cannot be removed as a file
        let work_dir = config.work_dir.join("island.osm");
        let blocked = work_dir.join(etl::parse_osm::SOURCE_FILE_NAME);
        fs::create_dir_all(blocked.join("inner")).unwrap();

        let err = run(&config).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InputNotFound);
        assert!(blocked.exists());
    }

    #[test]
    fn no_nodes_means_no_output() {
        let (_dir, config) = setup(r#"<osm version="0.6"><way id="1"><tag k="highway" v="primary"/></way></osm>"#);
        let err = run(&config).unwrap_err();
        assert_eq!(err.kind, ErrorKind::EmptyInput);
        assert!(!config.output_path.exists());
    }

    #[test]
    fn malformed_input_means_no_output() {
        let (_dir, config) = setup(r#"<osm><node id="1" lat="fifty-five" lon="10.0"/></osm>"#);
        let err = run(&config).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedAttribute);
        assert!(!config.output_path.exists());
    }

    #[test]
    fn failed_run_keeps_previous_output() {
        let (_dir, config) = setup(TWO_NODES);
        run(&config).unwrap();
        let previous = fs::read(&config.output_path).unwrap();

        fs::write(&config.input_path, "<osm></osm>").unwrap();
        assert!(run(&config).is_err());
        assert_eq!(fs::read(&config.output_path).unwrap(), previous);
    }

    #[test]
    fn missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = UserConfig {
            work_dir: dir.path().join("work"),
            ..UserConfig::new(dir.path().join("absent.osm"), dir.path().join("absent.json"))
        };
        assert_eq!(run(&config).unwrap_err().kind, ErrorKind::InputNotFound);
    }
}
