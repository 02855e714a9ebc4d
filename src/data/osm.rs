use std::collections::BTreeMap;

pub type OsmId = i64;

/// Latitude/longitude in decimal degrees.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, Copy, PartialEq)]
#[archive(check_bytes)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

/// Node table keyed by OSM id. Iterates in ascending id order.
pub type NodeTable = BTreeMap<OsmId, Coordinate>;

/// The part of the `<bounds>` element used as the rendering origin.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, Copy, PartialEq)]
#[archive(check_bytes)]
pub struct Bounds {
    pub maxlat: f64,
    pub minlon: f64,
}

/// A way as read from the document: ordered node references plus the value of
/// its first `highway` tag, if any.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Way {
    pub id: Option<OsmId>,
    pub refs: Vec<OsmId>,
    pub highway: Option<String>,
}

impl Way {
    /// Human readable label for diagnostics.
    pub fn label(&self) -> String {
        match self.id {
            Some(id) => format!("way {}", id),
            None => "way without id".to_string(),
        }
    }
}

/// Everything the graph builder needs from the source document.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct OsmRoadData {
    pub bounds: Bounds,
    pub nodes: NodeTable,
    pub ways: Vec<Way>,
}
