pub mod graph;
pub mod osm;
