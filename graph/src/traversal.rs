//! Neighborhood traversal shared by the sampler and the embedding store's
//! full-graph aggregation.

use rayon::prelude::*;

use crate::{Direction, Graph, Neighbors, NodeId};

/// Walks the neighborhoods of `nodes` in order.
///
/// # Arguments
/// * `graph` - The graph to traverse.
/// * `nodes` - The nodes to visit, all must belong to `graph`.
/// * `direction` - Which adjacency to follow.
///
/// # Returns
/// An iterator of `(node, neighbors)` pairs.
pub fn neighborhoods<'g>(
    graph: &'g Graph,
    nodes: &'g [NodeId],
    direction: Direction,
) -> impl Iterator<Item = (NodeId, Neighbors<'g>)> + 'g {
    nodes
        .iter()
        .map(move |&node| (node, graph.neighbors(node, direction)))
}

/// Maps every node of `graph` through `f` in parallel.
///
/// # Arguments
/// * `graph` - The graph to traverse.
/// * `direction` - Which adjacency to follow.
/// * `f` - Called once per node with its neighborhood.
///
/// # Returns
/// The results indexed by node id.
pub fn par_map_neighborhoods<T, F>(graph: &Graph, direction: Direction, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(NodeId, Neighbors<'_>) -> T + Sync + Send,
{
    (0..graph.num_nodes())
        .into_par_iter()
        .map(|i| {
            let node = i as NodeId;
            f(node, graph.neighbors(node, direction))
        })
        .collect()
}
