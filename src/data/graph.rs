use std::collections::BTreeMap;

use crate::errors::{Error, Result};

use super::osm::{Bounds, Coordinate, NodeTable, OsmId};

/// Neighbor lists keyed by node id. Iterates in ascending id order.
pub type AdjacencyList = BTreeMap<OsmId, Vec<OsmId>>;

/// Undirected road graph with the coordinates needed to draw it.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct RoadGraph {
    pub bounds: Bounds,
    pub nodes: NodeTable,
    pub adjacency: AdjacencyList,
}

impl RoadGraph {
    pub fn neighbors(&self, id: OsmId) -> &[OsmId] {
        self.adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of adjacency entries. Every road segment counts twice.
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }

    /// Every adjacency entry as a `(from, to)` coordinate pair, in ascending
    /// order of the source node id.
    pub fn segments(&self) -> impl Iterator<Item = Result<(&Coordinate, &Coordinate)>> + '_ {
        self.adjacency.keys().flat_map(move |&from| {
            self.neighbors(from).iter().map(move |&to| {
                match (self.nodes.get(&from), self.nodes.get(&to)) {
                    (Some(a), Some(b)) => Ok((a, b)),
                    (None, _) => Err(undefined_node(from)),
                    (_, None) => Err(undefined_node(to)),
                }
            })
        })
    }
}

fn undefined_node(id: OsmId) -> Error {
    Error::from(format!("Road graph references undefined node {}", id))
}
