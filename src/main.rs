mod data;
mod errors;
mod etl;
mod projection;

use std::env;
use std::fs::{create_dir_all, File};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use log::{error, info};
use serde::Deserialize;
use structured_logger::json::new_writer;
use structured_logger::Builder;

use crate::errors::{Error, Result};
use crate::etl::build_graph::BuildGraphEtl;
use crate::etl::draw_graph::{DrawGraphEtl, RasterConfig};
use crate::etl::export_csv::ExportCsvEtl;
use crate::etl::export_svg::{ExportSvgEtl, SvgStyle};
use crate::etl::parse_osm::ParseOsmEtl;
use crate::etl::{build_graph, parse_osm, Etl};

const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct UserConfig {
    pub data_path: String,
    pub output_dir: String,
    pub use_cache: bool,
    pub deduplicate_edges: bool,
    pub log_level: String,
    pub pause_on_exit: bool,
    pub svg_style: SvgStyle,
    pub raster: Option<RasterConfig>,
}

impl Default for UserConfig {
    fn default() -> Self {
        UserConfig {
            data_path: "map.osm".to_string(),
            output_dir: ".".to_string(),
            use_cache: false,
            deduplicate_edges: false,
            log_level: "info".to_string(),
            pause_on_exit: false,
            svg_style: SvgStyle::default(),
            raster: None,
        }
    }
}

/// Reads the config named on the command line, else `config.json` when
/// present, else falls back to the defaults.
fn load_user_config(explicit_path: Option<&str>) -> Result<UserConfig> {
    let path = match explicit_path {
        Some(path) => Path::new(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Path::new(DEFAULT_CONFIG_PATH),
        None => return Ok(UserConfig::default()),
    };
    let file = File::open(path)
        .map_err(|err| Error::from(err).context(format!("Could not open config file {}", path.display())))?;
    serde_json::from_reader(file)
        .map_err(|err| Error::from(err).context(format!("Could not parse config {}", path.display())))
}

fn create_output_dir(config: &UserConfig) -> Result<PathBuf> {
    let output_dir = PathBuf::from(&config.output_dir);
    create_dir_all(&output_dir)?;
    Ok(output_dir)
}

fn setup_logging(level: &str) {
    Builder::with_level(level)
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn run(config: &UserConfig) -> Result<()> {
    let output_dir = create_output_dir(config)?;
    let dir = output_dir.as_path();

    let default_raster = RasterConfig::default();
    let mut parse = ParseOsmEtl::new(config);
    let mut build = BuildGraphEtl::new(config);
    let mut export_csv = ExportCsvEtl;
    let mut export_svg = ExportSvgEtl::new(config);
    let mut draw = DrawGraphEtl::new(config.raster.as_ref().unwrap_or(&default_raster));

    // Outputs of an earlier run must not survive a failure of this one.
    if !config.use_cache {
        parse.clean(dir)?;
        build.clean(dir)?;
        export_csv.clean(dir)?;
        export_svg.clean(dir)?;
        draw.clean(dir)?;
    }

    parse.process(dir)?;
    build.process(dir)?;
    export_csv.process(dir)?;
    export_svg.process(dir)?;
    if config.raster.is_some() {
        draw.process(dir)?;
    }

    info!(
        output_dir = config.output_dir.as_str(),
        osm_cache = parse_osm::OUTPUT_FILE_NAME,
        graph_cache = build_graph::OUTPUT_FILE_NAME;
        "Conversion complete"
    );
    Ok(())
}

fn main() -> Result<()> {
    let explicit_path = env::args().nth(1);
    let user_config = load_user_config(explicit_path.as_deref())?;
    setup_logging(&user_config.log_level);

    let result = run(&user_config);
    if let Err(err) = &result {
        error!(err = err.message.as_str(); "Conversion failed");
    }

    if user_config.pause_on_exit {
        println!("\nPress ENTER to end.");
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
    }
    result
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    const END_TO_END_MAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <bounds minlat="50.0" minlon="10.0" maxlat="50.0" maxlon="10.1"/>
  <node id="1" lat="50.0" lon="10.0"/>
  <node id="2" lat="50.1" lon="10.1"/>
  <way id="1">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="residential"/>
  </way>
</osm>
"#;

    fn tmp() -> TempDir {
        tempfile::tempdir().expect("create temp dir")
    }

    fn config_for(dir: &Path, document: &str) -> UserConfig {
        let data_path = dir.join("map.osm");
        fs::write(&data_path, document).unwrap();
        UserConfig {
            data_path: data_path.to_string_lossy().into_owned(),
            output_dir: dir.to_string_lossy().into_owned(),
            ..UserConfig::default()
        }
    }

    #[test]
    fn converts_small_map_end_to_end() {
        let tmp = tmp();
        let dir = tmp.path();
        let config = UserConfig {
            raster: Some(RasterConfig::default()),
            ..config_for(dir, END_TO_END_MAP)
        };

        run(&config).unwrap();

        let csv = fs::read_to_string(dir.join(etl::export_csv::OUTPUT_FILE_NAME)).unwrap();
        assert_eq!(csv, "Nodes;Addjested Nodes\n1;{2,}\n2;{1,}\n");

        let svg = fs::read_to_string(dir.join(etl::export_svg::OUTPUT_FILE_NAME)).unwrap();
        assert_eq!(svg.matches("<line ").count(), 2);
        assert!(svg.trim_end().ends_with("</svg>"));

        let graph: data::graph::RoadGraph =
            etl::read_cache(&dir.join(build_graph::OUTPUT_FILE_NAME)).unwrap();
        assert_eq!(graph.neighbors(1), &[2]);
        assert_eq!(graph.neighbors(2), &[1]);

        assert!(dir.join(etl::draw_graph::OUTPUT_FILE_NAME).exists());
    }

    #[test]
    fn missing_maxlat_aborts_before_any_output() {
        let tmp = tmp();
        let dir = tmp.path();
        let config = config_for(dir, r#"<osm><bounds minlon="10.0"/></osm>"#);

        let err = run(&config).unwrap_err();
        assert!(err.message.contains("'maxlat'"), "{}", err.message);
        assert!(!dir.join(etl::export_svg::OUTPUT_FILE_NAME).exists());
        assert!(!dir.join(etl::export_csv::OUTPUT_FILE_NAME).exists());
    }

    #[test]
    fn failed_run_leaves_no_outputs_of_earlier_run() {
        let tmp = tmp();
        let dir = tmp.path();
        let config = UserConfig {
            raster: Some(RasterConfig::default()),
            ..config_for(dir, END_TO_END_MAP)
        };
        run(&config).unwrap();
        assert!(dir.join(etl::export_csv::OUTPUT_FILE_NAME).exists());

        fs::write(&config.data_path, r#"<osm><bounds minlon="10.0"/></osm>"#).unwrap();
        let err = run(&config).unwrap_err();
        assert!(err.message.contains("'maxlat'"), "{}", err.message);

        for name in [
            parse_osm::OUTPUT_FILE_NAME,
            build_graph::OUTPUT_FILE_NAME,
            etl::export_csv::OUTPUT_FILE_NAME,
            etl::export_svg::OUTPUT_FILE_NAME,
            etl::draw_graph::OUTPUT_FILE_NAME,
        ] {
            assert!(!dir.join(name).exists(), "{} survived the failed run", name);
        }
    }

    #[test]
    fn disabled_raster_removes_old_png() {
        let tmp = tmp();
        let dir = tmp.path();
        let config = config_for(dir, END_TO_END_MAP);
        fs::write(dir.join(etl::draw_graph::OUTPUT_FILE_NAME), "old").unwrap();

        run(&config).unwrap();

        assert!(!dir.join(etl::draw_graph::OUTPUT_FILE_NAME).exists());
    }

    #[test]
    fn dangling_reference_aborts_the_run() {
        let tmp = tmp();
        let dir = tmp.path();
        let config = config_for(dir, r#"<osm><bounds minlon="10.0" maxlat="50.0"/>
            <node id="1" lat="50.0" lon="10.0"/>
            <way id="8"><nd ref="1"/><nd ref="2"/><tag k="highway" v="service"/></way></osm>"#);

        let err = run(&config).unwrap_err();
        assert!(err.message.contains("way 8 references node 2"), "{}", err.message);
        assert!(!dir.join(build_graph::OUTPUT_FILE_NAME).exists());
    }

    #[test]
    fn stale_outputs_are_rebuilt_without_cache() {
        let tmp = tmp();
        let dir = tmp.path();
        let config = config_for(dir, END_TO_END_MAP);
        fs::write(dir.join(etl::export_csv::OUTPUT_FILE_NAME), "stale").unwrap();

        run(&config).unwrap();

        let csv = fs::read_to_string(dir.join(etl::export_csv::OUTPUT_FILE_NAME)).unwrap();
        assert!(csv.starts_with("Nodes;"));
    }

    #[test]
    fn cached_outputs_are_kept_with_cache() {
        let tmp = tmp();
        let dir = tmp.path();
        let config = UserConfig {
            use_cache: true,
            ..config_for(dir, END_TO_END_MAP)
        };
        fs::write(dir.join(etl::export_csv::OUTPUT_FILE_NAME), "cached").unwrap();

        run(&config).unwrap();

        let csv = fs::read_to_string(dir.join(etl::export_csv::OUTPUT_FILE_NAME)).unwrap();
        assert_eq!(csv, "cached");
        assert!(dir.join(etl::export_svg::OUTPUT_FILE_NAME).exists());
    }

    #[test]
    fn config_fields_are_optional() {
        let config: UserConfig = serde_json::from_str(
            r#"{"data_path": "city.osm.xz", "svg_style": {"stroke": "red"}}"#,
        ).unwrap();
        assert_eq!(config.data_path, "city.osm.xz");
        assert_eq!(config.output_dir, ".");
        assert_eq!(config.svg_style.stroke, "red");
        assert_eq!(config.svg_style.stroke_width, 1.0);
        assert!(config.raster.is_none());
        assert!(!config.use_cache);
    }

    #[test]
    fn missing_explicit_config_is_reported() {
        let err = load_user_config(Some("no/such/config.json")).unwrap_err();
        assert!(err.message.contains("no/such/config.json"), "{}", err.message);
    }
}
