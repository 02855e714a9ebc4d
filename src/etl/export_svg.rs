use std::{fs, io::Write, path::Path};

use quick_xml::escape::escape;
use serde::Deserialize;

use crate::data::graph::RoadGraph;
use crate::errors::Result;
use crate::projection::Projector;
use crate::UserConfig;

use super::{build_graph, read_cache, Etl};

pub const ETL_NAME: &str = "export_svg";
pub const OUTPUT_FILE_NAME: &str = "graph.svg";

const SVG_OPEN: &str = r#"<svg version="1.1" baseProfile="full" xmlns="http://www.w3.org/2000/svg">"#;
const SVG_CLOSE: &str = "</svg>";

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SvgStyle {
    pub stroke: String,
    pub stroke_width: f64,
}

impl Default for SvgStyle {
    fn default() -> Self {
        SvgStyle {
            stroke: "black".to_string(),
            stroke_width: 1.0,
        }
    }
}

/// One `<line>` per adjacency entry, so every road segment is drawn twice.
///
/// Numbers go through `f64`'s `Display`, which never depends on the locale.
pub fn write_svg<W: Write>(graph: &RoadGraph, style: &SvgStyle, writer: &mut W) -> Result<()> {
    let projector = Projector::new(&graph.bounds);
    let stroke = escape(&style.stroke);

    writeln!(writer, "{}", SVG_OPEN)?;
    for segment in graph.segments() {
        let (from, to) = segment?;
        let (x1, y1) = projector.to_display(from);
        let (x2, y2) = projector.to_display(to);
        writeln!(
            writer,
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="{}" />"#,
            x1, y1, x2, y2, stroke, style.stroke_width,
        )?;
    }
    writeln!(writer, "{}", SVG_CLOSE)?;
    Ok(())
}

pub struct ExportSvgEtl<'a> {
    config: &'a UserConfig,
}

impl ExportSvgEtl<'_> {
    pub fn new(config: &UserConfig) -> ExportSvgEtl {
        ExportSvgEtl {
            config
        }
    }
}

impl Etl for ExportSvgEtl<'_> {
    type Input = RoadGraph;
    type Output = Vec<u8>;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn output_file_name(&self) -> &str {
        OUTPUT_FILE_NAME
    }

    fn extract(&mut self, dir: &Path) -> Result<Self::Input> {
        read_cache(&dir.join(build_graph::OUTPUT_FILE_NAME))
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let mut output = Vec::new();
        write_svg(&input, &self.config.svg_style, &mut output)?;
        Ok(output)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        fs::write(dir.join(OUTPUT_FILE_NAME), output)?;
        Ok(())
    }
}
