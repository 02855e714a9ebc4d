use std::path::Path;

use log::info;
use tqdm::tqdm;

use crate::UserConfig;
use crate::data::graph::{AdjacencyList, RoadGraph};
use crate::data::osm::{Bounds, NodeTable, OsmId, OsmRoadData, Way};
use crate::errors::{Error, Result};
use crate::etl::parse_osm;

use super::{read_cache, write_cache, Etl};

pub const ETL_NAME: &str = "build_graph";
pub const OUTPUT_FILE_NAME: &str = "road_graph.rkyv";

/// `highway` values that count as roads. Must stay sorted, lookups are binary
/// searches.
pub const ROAD_CLASSES: [&str; 15] = [
    "living_street",
    "motorway",
    "motorway_link",
    "primary",
    "primary_link",
    "residential",
    "road",
    "secondary",
    "secondary_link",
    "service",
    "tertiary",
    "tertiary_link",
    "trunk",
    "trunk_link",
    "unclassified",
];

pub fn is_road_class(highway: &str) -> bool {
    ROAD_CLASSES.binary_search(&highway).is_ok()
}

/// Accumulates the adjacency list of an undirected road graph, one way at a
/// time.
pub struct GraphBuilder {
    bounds: Bounds,
    nodes: NodeTable,
    adjacency: AdjacencyList,
    deduplicate: bool,
}

impl GraphBuilder {
    pub fn new(bounds: Bounds, nodes: NodeTable) -> GraphBuilder {
        GraphBuilder {
            bounds,
            nodes,
            adjacency: AdjacencyList::new(),
            deduplicate: false,
        }
    }

    /// Drop an edge when the same neighbor is already listed for a node.
    pub fn deduplicate_edges(mut self, deduplicate: bool) -> GraphBuilder {
        self.deduplicate = deduplicate;
        self
    }

    fn add_edge(&mut self, from: OsmId, to: OsmId) {
        let neighbors = self.adjacency.entry(from).or_default();
        if !(self.deduplicate && neighbors.contains(&to)) {
            neighbors.push(to);
        }
    }

    /// Links consecutive references of a road way in both directions.
    ///
    /// Returns `Ok(false)` without touching the graph when the way is not a
    /// road. A road referencing a node missing from the node table is an
    /// error, and nothing from that way is added.
    pub fn add_way(&mut self, way: &Way) -> Result<bool> {
        if !way.highway.as_deref().is_some_and(is_road_class) {
            return Ok(false);
        }

        if let Some(missing) = way.refs.iter().find(|id| !self.nodes.contains_key(*id)) {
            return Err(Error::from(format!(
                "{} references node {} which is not defined in the document",
                way.label(),
                missing,
            )));
        }

        let refs = &way.refs;
        for i in 0..refs.len() {
            if i + 1 < refs.len() {
                self.add_edge(refs[i], refs[i + 1]);
            }
            if i >= 1 {
                self.add_edge(refs[i], refs[i - 1]);
            }
        }
        Ok(true)
    }

    pub fn build(self) -> RoadGraph {
        RoadGraph {
            bounds: self.bounds,
            nodes: self.nodes,
            adjacency: self.adjacency,
        }
    }
}

pub struct BuildGraphEtl<'a> {
    config: &'a UserConfig,
}

impl BuildGraphEtl<'_> {
    pub fn new(config: &UserConfig) -> BuildGraphEtl {
        BuildGraphEtl {
            config
        }
    }
}

impl Etl for BuildGraphEtl<'_> {
    type Input = OsmRoadData;
    type Output = RoadGraph;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn output_file_name(&self) -> &str {
        OUTPUT_FILE_NAME
    }

    fn extract(&mut self, dir: &Path) -> Result<Self::Input> {
        read_cache(&dir.join(parse_osm::OUTPUT_FILE_NAME))
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let mut builder = GraphBuilder::new(input.bounds, input.nodes)
            .deduplicate_edges(self.config.deduplicate_edges);

        let mut road_ways = 0_usize;
        for way in tqdm(input.ways.iter()) {
            if builder.add_way(way)? {
                road_ways += 1;
            }
        }

        let graph = builder.build();
        info!(
            etl_name = ETL_NAME,
            road_ways = road_ways,
            connected_nodes = graph.adjacency.len(),
            edges = graph.edge_count();
            "Built road graph"
        );
        Ok(graph)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        write_cache(&dir.join(OUTPUT_FILE_NAME), &output)
    }
}
