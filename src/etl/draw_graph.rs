use std::path::{Path, PathBuf};

use log::info;
use raqote::{DrawOptions, DrawTarget, LineCap, LineJoin, PathBuilder, SolidSource, Source, StrokeStyle};
use serde::Deserialize;

use crate::data::graph::RoadGraph;
use crate::errors::{Error, Result};
use crate::projection::Projector;

use super::{build_graph, read_cache, Etl};

pub const ETL_NAME: &str = "draw_graph";
pub const OUTPUT_FILE_NAME: &str = "graph.png";

use serialize_color::deserialize;

/// Raster preview settings. Colors are `#rrggbbaa`.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RasterConfig {
    /// Pixels per drawing unit (a tenth of a meter at the equator).
    pub scale: f64,
    pub margin_px: u32,
    pub max_dimension_px: u32,
    pub line_width: f32,

    #[serde(deserialize_with = "deserialize")]
    pub road_color: SolidSource,

    #[serde(deserialize_with = "deserialize")]
    pub background_color: SolidSource,
}

impl Default for RasterConfig {
    fn default() -> Self {
        RasterConfig {
            scale: 1.0,
            margin_px: 10,
            max_dimension_px: 16384,
            line_width: 1.0,
            road_color: SolidSource::from_unpremultiplied_argb(0xff, 0x00, 0x00, 0x00),
            background_color: SolidSource::from_unpremultiplied_argb(0xff, 0xff, 0xff, 0xff),
        }
    }
}

mod serialize_color {
    use raqote::SolidSource;
    use serde::{de, Deserializer};
    use serde::de::Visitor;


    struct ColorVisitor;

    impl<'de> Visitor<'de> for ColorVisitor {
        type Value = SolidSource;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(formatter, "a color string formatted as '#rrggbbaa'")
        }

        fn visit_str<E>(self, string: &str) -> Result<Self::Value, E> where E: de::Error {
            if string.len() != 9
                || !string.starts_with('#')
                || !string[1..].bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(de::Error::invalid_value(de::Unexpected::Str(string), &self))
            }
            let r = parse_hex_byte(&self, &string[1..3])?;
            let g = parse_hex_byte(&self, &string[3..5])?;
            let b = parse_hex_byte(&self, &string[5..7])?;
            let a = parse_hex_byte(&self, &string[7..9])?;
            Ok(SolidSource::from_unpremultiplied_argb(a, r, g, b))
        }
    }

    fn parse_hex_byte<E>(visitor: &ColorVisitor, string: &str) -> Result<u8, E> where E: de::Error {
        u8::from_str_radix(string, 16).map_err(|_| {
            de::Error::invalid_value(de::Unexpected::Str(string), visitor)
        })
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SolidSource, D::Error>
        where D: Deserializer<'de> {
        deserializer.deserialize_str(ColorVisitor)
    }
}

pub struct DrawGraphEtl<'a> {
    config: &'a RasterConfig,
}

impl DrawGraphEtl<'_> {
    fn output_path(dir: &Path) -> PathBuf {
        dir.join(OUTPUT_FILE_NAME)
    }

    fn stroke(width: f32) -> StrokeStyle {
        StrokeStyle {
            cap: LineCap::Round,
            join: LineJoin::Round,
            width,
            miter_limit: 2.0,
            dash_array: Vec::new(),
            dash_offset: 0.0,
        }
    }

    /// Image size in pixels needed to show every node east and south of the
    /// bounds corner.
    pub fn dimensions(&self, graph: &RoadGraph) -> Result<(i32, i32)> {
        let projector = Projector::new(&graph.bounds);
        let (mut max_x, mut max_y) = (0.0_f64, 0.0_f64);
        for segment in graph.segments() {
            let (from, _) = segment?;
            let (x, y) = projector.to_display(from);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let margin = f64::from(self.config.margin_px);
        let width = (max_x * self.config.scale).ceil() + 2.0 * margin;
        let height = (max_y * self.config.scale).ceil() + 2.0 * margin;
        let limit = f64::from(self.config.max_dimension_px);
        if width > limit || height > limit {
            return Err(Error::from(format!(
                "Raster of {}x{} px exceeds the configured maximum of {} px, lower the scale",
                width, height, self.config.max_dimension_px,
            )));
        }
        Ok((width.max(1.0) as i32, height.max(1.0) as i32))
    }

    pub fn draw(&self, graph: &RoadGraph) -> Result<DrawTarget> {
        let (width, height) = self.dimensions(graph)?;
        let mut dt = DrawTarget::new(width, height);
        dt.clear(self.config.background_color);

        let projector = Projector::new(&graph.bounds);
        let margin = self.config.margin_px as f32;
        let to_px = |value: f64| (value * self.config.scale) as f32 + margin;

        let mut pb = PathBuilder::new();
        for segment in graph.segments() {
            let (from, to) = segment?;
            let (x1, y1) = projector.to_display(from);
            let (x2, y2) = projector.to_display(to);
            pb.move_to(to_px(x1), to_px(y1));
            pb.line_to(to_px(x2), to_px(y2));
        }
        let raqote_path = pb.finish();

        dt.stroke(
            &raqote_path,
            &Source::Solid(self.config.road_color),
            &Self::stroke(self.config.line_width),
            &DrawOptions::new(),
        );
        info!(etl_name = ETL_NAME, width = width, height = height; "Rasterized road graph");
        Ok(dt)
    }

    pub fn new(config: &RasterConfig) -> DrawGraphEtl {
        DrawGraphEtl {
            config,
        }
    }
}

impl Etl for DrawGraphEtl<'_> {
    type Input = RoadGraph;
    type Output = DrawTarget;

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
        self.draw(&input)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        output.write_png(
            Self::output_path(dir)
        ).map_err(|_| "Couldn't write png. (encoding error)".into())
    }
}
