use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::{GraphErr, Result};

pub type NodeId = u64;
pub type EdgeId = u64;

/// The largest node count `Graph::read_edge_list` accepts.
pub const MAX_EDGE_LIST_NODES: usize = u32::MAX as usize;

/// Which adjacency of a node to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Follow edges pointing at the node, `(neighbor, node)`.
    #[default]
    In,
    /// Follow edges leaving the node, `(node, neighbor)`.
    Out,
}

/// One direction of the adjacency in compressed sparse row form.
#[derive(Debug)]
struct Csr {
    offsets: Box<[usize]>,
    neighbors: Box<[NodeId]>,
    edges: Box<[EdgeId]>,
}

impl Csr {
    /// Builds the rows of a csr keyed by `key(edge)`, the other endpoint becoming the neighbor.
    ///
    /// Within a row neighbors are kept in ascending edge id order.
    fn build<F>(num_nodes: usize, edges: &[(NodeId, NodeId)], key: F) -> Self
    where
        F: Fn(&(NodeId, NodeId)) -> (NodeId, NodeId),
    {
        let mut offsets = vec![0; num_nodes + 1];

        for edge in edges {
            let (row, _) = key(edge);
            offsets[row as usize + 1] += 1;
        }

        for i in 0..num_nodes {
            offsets[i + 1] += offsets[i];
        }

        let mut cursor = offsets.clone();
        let mut neighbors = vec![0; edges.len()];
        let mut edge_ids = vec![0; edges.len()];

        for (id, edge) in edges.iter().enumerate() {
            let (row, neighbor) = key(edge);
            let slot = &mut cursor[row as usize];
            neighbors[*slot] = neighbor;
            edge_ids[*slot] = id as EdgeId;
            *slot += 1;
        }

        Self {
            offsets: offsets.into_boxed_slice(),
            neighbors: neighbors.into_boxed_slice(),
            edges: edge_ids.into_boxed_slice(),
        }
    }

    fn row(&self, node: NodeId) -> Neighbors<'_> {
        let node = node as usize;
        let (start, end) = (self.offsets[node], self.offsets[node + 1]);

        Neighbors {
            nodes: &self.neighbors[start..end],
            edges: &self.edges[start..end],
        }
    }
}

/// The neighborhood of a single node, neighbor ids paired with the ids of the edges reaching them.
#[derive(Debug, Clone, Copy)]
pub struct Neighbors<'a> {
    nodes: &'a [NodeId],
    edges: &'a [EdgeId],
}

impl<'a> Neighbors<'a> {
    pub fn nodes(&self) -> &'a [NodeId] {
        self.nodes
    }

    pub fn edges(&self) -> &'a [EdgeId] {
        self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over `(neighbor, edge)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, EdgeId)> + 'a {
        self.nodes.iter().copied().zip(self.edges.iter().copied())
    }
}

/// An immutable directed graph over the nodes `0..num_nodes`.
///
/// Both adjacencies are materialized at construction so in and out neighbor
/// queries are a slice lookup. The graph is never mutated afterwards and can be
/// shared across threads without synchronization.
#[derive(Debug)]
pub struct Graph {
    num_nodes: usize,
    edges: Box<[(NodeId, NodeId)]>,
    in_csr: Csr,
    out_csr: Csr,
}

impl Graph {
    /// Creates a new `Graph`.
    ///
    /// # Arguments
    /// * `num_nodes` - The amount of nodes in the graph.
    /// * `edges` - The `(src, dst)` edges, an edge's id is its position in this list.
    ///
    /// # Returns
    /// A new `Graph` or `GraphErr::NodeOutOfRange` if an edge references an unknown node.
    pub fn new(num_nodes: usize, edges: Vec<(NodeId, NodeId)>) -> Result<Self> {
        if let Some(&node) = edges
            .iter()
            .flat_map(|(src, dst)| [src, dst])
            .find(|&&node| node as usize >= num_nodes)
        {
            return Err(GraphErr::NodeOutOfRange { node, num_nodes });
        }

        let in_csr = Csr::build(num_nodes, &edges, |&(src, dst)| (dst, src));
        let out_csr = Csr::build(num_nodes, &edges, |&(src, dst)| (src, dst));

        Ok(Self {
            num_nodes,
            edges: edges.into_boxed_slice(),
            in_csr,
            out_csr,
        })
    }

    /// Reads a whitespace separated `src dst` edge list.
    ///
    /// Blank lines and lines starting with `#` are skipped, the node count is
    /// one past the largest id seen. Ids must be below `MAX_EDGE_LIST_NODES`.
    pub fn read_edge_list<R: BufRead>(reader: R) -> Result<Self> {
        let mut edges = Vec::new();
        let mut num_nodes = 0;

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parse = |field: Option<&str>| -> Result<NodeId> {
                let field = field.ok_or_else(|| GraphErr::Parse {
                    line: i + 1,
                    reason: "expected two node ids".into(),
                })?;

                let node: NodeId = field.parse().map_err(|e| GraphErr::Parse {
                    line: i + 1,
                    reason: format!("{field:?}: {e}"),
                })?;

                if node >= MAX_EDGE_LIST_NODES as NodeId {
                    return Err(GraphErr::NodeOutOfRange {
                        node,
                        num_nodes: MAX_EDGE_LIST_NODES,
                    });
                }

                Ok(node)
            };

            let mut fields = line.split_whitespace();
            let (src, dst) = (parse(fields.next())?, parse(fields.next())?);
            // Both ids are below `MAX_EDGE_LIST_NODES`, the sum can't overflow.
            num_nodes = num_nodes.max(src.max(dst) as usize + 1);
            edges.push((src, dst));
        }

        Self::new(num_nodes, edges)
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Whether `node` is part of this graph.
    pub fn contains(&self, node: NodeId) -> bool {
        (node as usize) < self.num_nodes
    }

    /// Returns the `(src, dst)` endpoints of the edge `id`.
    pub fn edge(&self, id: EdgeId) -> Option<(NodeId, NodeId)> {
        self.edges.get(id as usize).copied()
    }

    /// Returns the neighborhood of `node` following `direction`.
    ///
    /// # Panics
    /// If `node` is not part of this graph.
    pub fn neighbors(&self, node: NodeId, direction: Direction) -> Neighbors<'_> {
        match direction {
            Direction::In => self.in_csr.row(node),
            Direction::Out => self.out_csr.row(node),
        }
    }

    pub fn in_neighbors(&self, node: NodeId) -> &[NodeId] {
        self.in_csr.row(node).nodes()
    }

    pub fn out_neighbors(&self, node: NodeId) -> &[NodeId] {
        self.out_csr.row(node).nodes()
    }

    /// The amount of edges incident to `node` in `direction`.
    pub fn degree(&self, node: NodeId, direction: Direction) -> usize {
        self.neighbors(node, direction).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Graph {
        Graph::new(4, vec![(0, 1), (0, 2), (1, 3), (2, 3), (3, 0)]).unwrap()
    }

    #[test]
    fn test_adjacency_both_directions() {
        let g = diamond();

        assert_eq!(g.out_neighbors(0), [1, 2]);
        assert_eq!(g.in_neighbors(3), [1, 2]);
        assert_eq!(g.in_neighbors(0), [3]);
        assert_eq!(g.degree(3, Direction::In), 2);
        assert_eq!(g.degree(3, Direction::Out), 1);
    }

    #[test]
    fn test_neighbors_carry_edge_ids() {
        let g = diamond();
        let pairs: Vec<_> = g.neighbors(3, Direction::In).iter().collect();

        assert_eq!(pairs, [(1, 2), (2, 3)]);
        assert_eq!(g.edge(2), Some((1, 3)));
        assert_eq!(g.edge(5), None);
    }

    #[test]
    fn test_isolated_node_has_empty_rows() {
        let g = Graph::new(3, vec![(0, 1)]).unwrap();

        assert!(g.neighbors(2, Direction::In).is_empty());
        assert!(g.neighbors(2, Direction::Out).is_empty());
    }

    #[test]
    fn test_rejects_out_of_range_edge() {
        let err = Graph::new(2, vec![(0, 1), (1, 2)]).unwrap_err();
        assert!(matches!(err, GraphErr::NodeOutOfRange { node: 2, num_nodes: 2 }));
    }

    #[test]
    fn test_read_edge_list() {
        let text = "# comment\n0 1\n\n1 2\n2 0\n";
        let g = Graph::read_edge_list(text.as_bytes()).unwrap();

        assert_eq!(g.num_nodes(), 3);
        assert_eq!(g.num_edges(), 3);
        assert_eq!(g.in_neighbors(0), [2]);
    }

    #[test]
    fn test_read_edge_list_reports_line() {
        let err = Graph::read_edge_list("0 1\n1 x\n".as_bytes()).unwrap_err();
        assert!(matches!(err, GraphErr::Parse { line: 2, .. }));
    }

    #[test]
    fn test_read_edge_list_rejects_huge_ids() {
        let err = Graph::read_edge_list("0 18446744073709551615\n".as_bytes()).unwrap_err();
        assert!(matches!(err, GraphErr::NodeOutOfRange { node: u64::MAX, .. }));

        // Parseable but far too many nodes to allocate.
        let err = Graph::read_edge_list("0 1\n10000000000000 2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, GraphErr::NodeOutOfRange { node: 10_000_000_000_000, .. }));

        let err = Graph::read_edge_list("18446744073709551616 0\n".as_bytes()).unwrap_err();
        assert!(matches!(err, GraphErr::Parse { line: 1, .. }));
    }
}
