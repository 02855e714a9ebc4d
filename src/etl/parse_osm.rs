use std::fmt::Display;
use std::fs;
use std::io::{BufRead, BufReader};
use std::mem;
use std::path::Path;
use std::str::FromStr;

use log::info;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use xz::bufread::XzDecoder;

use crate::UserConfig;
use crate::data::osm::{Bounds, Coordinate, NodeTable, OsmId, OsmRoadData, Way};
use crate::errors::{Error, Result};
use crate::etl::build_graph::is_road_class;

use super::{write_cache, Etl};

pub const ETL_NAME: &str = "parse_osm";
pub const OUTPUT_FILE_NAME: &str = "osm_roads.rkyv";

pub type OsmReader = Reader<Box<dyn BufRead>>;

enum ParserState {
    Top,
    Node,
    Way(Way),
}

pub struct ParseOsmEtl<'a> {
    config: &'a UserConfig,
}

impl ParseOsmEtl<'_> {
    fn create_osm_reader(&self) -> Result<OsmReader> {
        create_osm_reader(Path::new(&self.config.data_path))
    }

    pub fn new(config: &UserConfig) -> ParseOsmEtl {
        ParseOsmEtl {
            config
        }
    }
}

/// Opens an `.osm` document, decompressing on the fly when the file name ends
/// in `.xz`.
pub fn create_osm_reader(path: &Path) -> Result<OsmReader> {
    let file = fs::File::open(path)
        .map_err(|err| Error::from(err).context(format!("Could not open {}", path.display())))?;
    let file_reader = BufReader::new(file);
    let source: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "xz") {
        Box::new(BufReader::new(XzDecoder::new(file_reader)))
    } else {
        Box::new(file_reader)
    };
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true);

    Ok(reader)
}

fn find_attribute(el: &BytesStart, key: &str) -> Result<Option<String>> {
    for attribute_res in el.attributes() {
        let attribute = attribute_res?;
        if attribute.key.as_ref() == key.as_bytes() {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_attribute<T>(el: &BytesStart, key: &str, element: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match find_attribute(el, key)? {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|err| {
            Error::from(format!("{} has an invalid '{}' value {:?}: {}", element, key, raw, err))
        }),
    }
}

fn require_attribute<T>(el: &BytesStart, key: &str, element: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    parse_attribute(el, key, element)?
        .ok_or_else(|| Error::from(format!("{} is missing the '{}' attribute", element, key)))
}

fn parse_bounds(el: &BytesStart, position: usize) -> Result<Bounds> {
    let element = format!("<bounds> at byte {}", position);
    Ok(Bounds {
        maxlat: require_attribute(el, "maxlat", &element)?,
        minlon: require_attribute(el, "minlon", &element)?,
    })
}

fn parse_node(el: &BytesStart, position: usize) -> Result<(OsmId, Coordinate)> {
    let id: OsmId = require_attribute(el, "id", &format!("<node> at byte {}", position))?;
    let element = format!("<node id=\"{}\">", id);
    let coords = Coordinate {
        lat: require_attribute(el, "lat", &element)?,
        lon: require_attribute(el, "lon", &element)?,
    };
    Ok((id, coords))
}

fn parse_way(el: &BytesStart, position: usize) -> Result<Way> {
    Ok(Way {
        id: parse_attribute(el, "id", &format!("<way> at byte {}", position))?,
        refs: Vec::new(),
        highway: None,
    })
}

fn parse_way_child(way: &mut Way, el: &BytesStart, position: usize) -> Result<()> {
    match el.name().as_ref() {
        b"nd" => {
            let element = format!("<nd> of {} at byte {}", way.label(), position);
            way.refs.push(require_attribute(el, "ref", &element)?);
        },
        b"tag" => {
            if way.highway.is_none() && find_attribute(el, "k")?.as_deref() == Some("highway") {
                let element = format!("highway <tag> of {} at byte {}", way.label(), position);
                way.highway = Some(require_attribute(el, "v", &element)?);
            }
        },
        _ => (),
    }
    Ok(())
}

struct OsmParser {
    bounds: Option<Bounds>,
    nodes: NodeTable,
    ways: Vec<Way>,
    skipped_ways: usize,
    state: ParserState,
}

impl OsmParser {
    fn new() -> OsmParser {
        OsmParser {
            bounds: None,
            nodes: NodeTable::new(),
            ways: Vec::new(),
            skipped_ways: 0,
            state: ParserState::Top,
        }
    }

    fn finish_way(&mut self, way: Way) {
        if way.highway.as_deref().is_some_and(is_road_class) {
            self.ways.push(way);
        } else {
            self.skipped_ways += 1;
        }
    }

    fn start(&mut self, el: &BytesStart, has_children: bool, position: usize) -> Result<()> {
        match &mut self.state {
            ParserState::Way(way) => return parse_way_child(way, el, position),
            // Tags on nodes are not needed.
            ParserState::Node => return Ok(()),
            ParserState::Top => (),
        }

        match el.name().as_ref() {
            b"bounds" => {
                if self.bounds.is_none() {
                    self.bounds = Some(parse_bounds(el, position)?);
                }
            },
            b"node" => {
                let (id, coords) = parse_node(el, position)?;
                if self.nodes.insert(id, coords).is_some() {
                    return Err(format!("<node id=\"{}\"> is defined more than once", id).into());
                }
                if has_children {
                    self.state = ParserState::Node;
                }
            },
            b"way" => {
                let way = parse_way(el, position)?;
                if has_children {
                    self.state = ParserState::Way(way);
                } else {
                    self.finish_way(way);
                }
            },
            _ => (),
        }
        Ok(())
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"way" => {
                if let ParserState::Way(way) = mem::replace(&mut self.state, ParserState::Top) {
                    self.finish_way(way);
                }
            },
            b"node" => self.state = ParserState::Top,
            _ => (),
        }
    }

    fn finish(self) -> Result<OsmRoadData> {
        let bounds = self.bounds.ok_or("Document has no <bounds> element")?;

        info!(
            etl_name = ETL_NAME,
            nodes = self.nodes.len(),
            road_ways = self.ways.len(),
            skipped_ways = self.skipped_ways;
            "Parsed OSM document"
        );

        Ok(OsmRoadData {
            bounds,
            nodes: self.nodes,
            ways: self.ways,
        })
    }
}

/// Single pass over the document collecting bounds, all nodes and the ways
/// tagged with a road class.
pub fn parse_osm<R: BufRead>(mut reader: Reader<R>) -> Result<OsmRoadData> {
    let mut buf = Vec::new();
    let mut parser = OsmParser::new();

    loop {
        let position = reader.buffer_position();
        match reader.read_event_into(&mut buf) {
            Err(e) => {
                return Err(Error::from(e).context(format!("Malformed XML near byte {}", reader.buffer_position())))
            },
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => parser.start(&e, true, position)?,
            Ok(Event::Empty(e)) => parser.start(&e, false, position)?,
            Ok(Event::End(e)) => parser.end(e.name().as_ref()),
            // Declarations, comments, text and the like carry nothing we use.
            Ok(_) => (),
        }
        // if we don't keep a borrow elsewhere, we can clear the buffer to keep memory usage low
        buf.clear();
    }

    parser.finish()
}

impl Etl for ParseOsmEtl<'_> {
    type Input = OsmReader;
    type Output = OsmRoadData;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn output_file_name(&self) -> &str {
        OUTPUT_FILE_NAME
    }

    fn extract(&mut self, _dir: &Path) -> Result<Self::Input> {
        self.create_osm_reader()
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        parse_osm(input)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        write_cache(&dir.join(OUTPUT_FILE_NAME), &output)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SMALL_MAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="test">
  <bounds minlat="49.9" minlon="10.0" maxlat="50.0" maxlon="10.2"/>
  <node id="1" lat="50.0" lon="10.0"/>
  <node id="2" lat="50.1" lon="10.1">
    <tag k="highway" v="traffic_signals"/>
  </node>
  <node id="3" lat="49.95" lon="10.15"/>
  <way id="10">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="residential"/>
  </way>
  <way id="11">
    <tag k="building" v="yes"/>
    <nd ref="2"/>
    <nd ref="3"/>
  </way>
  <way id="12">
    <tag k="highway" v="footway"/>
    <nd ref="1"/>
    <nd ref="3"/>
  </way>
</osm>
"#;

    fn parse(document: &str) -> Result<OsmRoadData> {
        let mut reader = Reader::from_str(document);
        reader.trim_text(true);
        parse_osm(reader)
    }

    fn with_bounds(body: &str) -> String {
        format!(r#"<osm><bounds minlon="10.0" maxlat="50.0"/>{}</osm>"#, body)
    }

    #[test]
    fn parses_bounds_nodes_and_road_ways() {
        let data = parse(SMALL_MAP).unwrap();

        assert_eq!(data.bounds, Bounds { maxlat: 50.0, minlon: 10.0 });
        assert_eq!(data.nodes.len(), 3);
        assert_eq!(data.nodes[&2], Coordinate { lat: 50.1, lon: 10.1 });
        assert_eq!(data.ways, vec![Way {
            id: Some(10),
            refs: vec![1, 2],
            highway: Some("residential".to_string()),
        }]);
    }

    #[test]
    fn highway_tag_may_precede_refs() {
        let data = parse(&with_bounds(
            r#"<node id="1" lat="1" lon="1"/><node id="2" lat="2" lon="2"/>
               <way><tag k="highway" v="service"/><nd ref="2"/><nd ref="1"/></way>"#,
        )).unwrap();
        assert_eq!(data.ways[0].refs, vec![2, 1]);
        assert_eq!(data.ways[0].id, None);
    }

    #[test]
    fn first_highway_tag_wins() {
        let data = parse(&with_bounds(
            r#"<way id="1"><nd ref="1"/><tag k="highway" v="footway"/><tag k="highway" v="primary"/></way>"#,
        )).unwrap();
        assert!(data.ways.is_empty());
    }

    #[test]
    fn missing_maxlat_is_reported() {
        let err = parse(r#"<osm><bounds minlon="10.0"/></osm>"#).unwrap_err();
        assert!(err.message.contains("<bounds>"), "{}", err.message);
        assert!(err.message.contains("'maxlat'"), "{}", err.message);
    }

    #[test]
    fn missing_bounds_is_reported() {
        let err = parse(r#"<osm><node id="1" lat="1" lon="1"/></osm>"#).unwrap_err();
        assert!(err.message.contains("no <bounds>"), "{}", err.message);
    }

    #[test]
    fn bad_coordinate_names_the_node() {
        let err = parse(&with_bounds(r#"<node id="7" lat="north" lon="1"/>"#)).unwrap_err();
        assert!(err.message.contains("<node id=\"7\">"), "{}", err.message);
        assert!(err.message.contains("'lat'"), "{}", err.message);
    }

    #[test]
    fn missing_node_id_is_reported() {
        let err = parse(&with_bounds(r#"<node lat="1" lon="1"/>"#)).unwrap_err();
        assert!(err.message.contains("missing the 'id' attribute"), "{}", err.message);
    }

    #[test]
    fn missing_nd_ref_is_reported() {
        let err = parse(&with_bounds(r#"<way id="4"><nd/></way>"#)).unwrap_err();
        assert!(err.message.contains("<nd> of way 4"), "{}", err.message);
    }

    #[test]
    fn duplicate_node_is_reported() {
        let err = parse(&with_bounds(
            r#"<node id="1" lat="1" lon="1"/><node id="1" lat="2" lon="2"/>"#,
        )).unwrap_err();
        assert!(err.message.contains("more than once"), "{}", err.message);
    }

    #[test]
    fn reads_xz_compressed_documents() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("small.osm.xz");

        let mut encoder = xz::write::XzEncoder::new(fs::File::create(&path).unwrap(), 6);
        encoder.write_all(SMALL_MAP.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let data = parse_osm(create_osm_reader(&path).unwrap()).unwrap();
        assert_eq!(data.nodes.len(), 3);
        assert_eq!(data.ways.len(), 1);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = create_osm_reader(Path::new("does/not/exist.osm")).err().unwrap();
        assert!(err.message.contains("does/not/exist.osm"), "{}", err.message);
    }
}
