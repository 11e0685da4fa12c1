use crate::{EdgeId, GraphErr, NodeId, Result};

/// Per node feature rows attached to a layer, `rows * dim` values in row major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    dim: usize,
    data: Vec<f32>,
}

impl Features {
    /// Creates a new `Features` tensor.
    ///
    /// # Arguments
    /// * `dim` - The length of every row.
    /// * `data` - The rows laid out contiguously, its length must be a multiple of `dim`.
    pub fn new(dim: usize, data: Vec<f32>) -> Self {
        Self { dim, data }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn rows(&self) -> usize {
        self.data.len().checked_div(self.dim).unwrap_or_default()
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Supplies feature rows for graph nodes, invoked once a `Flow` structure is built.
pub trait FeatureProvider {
    type Error;

    /// Should return exactly one row per id, in the order of `parent_nodes`.
    fn features(&self, parent_nodes: &[NodeId]) -> std::result::Result<Features, Self::Error>;
}

/// One layer of a `Flow`, local ids are positions in `parent_nodes`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Layer {
    parent_nodes: Vec<NodeId>,
    features: Option<Features>,
}

impl Layer {
    pub fn len(&self) -> usize {
        self.parent_nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent_nodes.is_empty()
    }

    /// The graph node ids of this layer indexed by local id.
    pub fn parent_nodes(&self) -> &[NodeId] {
        &self.parent_nodes
    }

    pub fn parent(&self, local: u32) -> Option<NodeId> {
        self.parent_nodes.get(local as usize).copied()
    }

    pub fn features(&self) -> Option<&Features> {
        self.features.as_ref()
    }
}

/// The edges connecting layer `i + 1` to layer `i`.
///
/// Every edge is a `(src, dst)` pair of local ids, `src` indexes the outer
/// layer (the node that was expanded) and `dst` the inner layer (the sampled
/// neighbor).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    edges: Vec<(u32, u32)>,
    parent_edges: Vec<EdgeId>,
}

impl Block {
    /// Creates a new `Block`.
    ///
    /// # Returns
    /// `GraphErr::InvalidFlow` if there isn't exactly one parent edge id per edge.
    pub fn new(edges: Vec<(u32, u32)>, parent_edges: Vec<EdgeId>) -> Result<Self> {
        if edges.len() != parent_edges.len() {
            return Err(GraphErr::InvalidFlow(format!(
                "block has {} edges but {} parent edge ids",
                edges.len(),
                parent_edges.len()
            )));
        }

        Ok(Self {
            edges,
            parent_edges,
        })
    }

    pub(crate) fn push(&mut self, src: u32, dst: u32, parent: EdgeId) {
        self.edges.push((src, dst));
        self.parent_edges.push(parent);
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edges(&self) -> &[(u32, u32)] {
        &self.edges
    }

    /// The graph edge ids of this block indexed by local edge id.
    pub fn parent_edges(&self) -> &[EdgeId] {
        &self.parent_edges
    }
}

/// A layered subgraph produced by multi-hop neighbor sampling.
///
/// Layer `num_hops()` holds the seeds, layer `0` the furthest hop. Block `i`
/// holds the only edges between layer `i` and layer `i + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    layers: Vec<Layer>,
    blocks: Vec<Block>,
}

impl Flow {
    /// Assembles a `Flow` checking its structural invariants.
    ///
    /// # Arguments
    /// * `layers` - The parent node ids of every layer, innermost first.
    /// * `blocks` - The blocks between consecutive layers, innermost first.
    ///
    /// # Returns
    /// A new `Flow` or `GraphErr::InvalidFlow` if the parts don't line up.
    pub fn from_parts(layers: Vec<Vec<NodeId>>, blocks: Vec<Block>) -> Result<Self> {
        if layers.is_empty() {
            return Err(GraphErr::InvalidFlow("a flow has at least one layer".into()));
        }

        if blocks.len() + 1 != layers.len() {
            return Err(GraphErr::InvalidFlow(format!(
                "{} layers need {} blocks, got {}",
                layers.len(),
                layers.len() - 1,
                blocks.len()
            )));
        }

        for (i, block) in blocks.iter().enumerate() {
            let (inner, outer) = (layers[i].len(), layers[i + 1].len());

            if let Some(&(src, dst)) = block
                .edges
                .iter()
                .find(|&&(src, dst)| src as usize >= outer || dst as usize >= inner)
            {
                return Err(GraphErr::InvalidFlow(format!(
                    "block {i} edge ({src}, {dst}) exceeds layers of {outer} and {inner} nodes"
                )));
            }
        }

        Ok(Self::from_sampled(layers, blocks))
    }

    /// Builds a `Flow` whose invariants hold by construction.
    pub(crate) fn from_sampled(layers: Vec<Vec<NodeId>>, blocks: Vec<Block>) -> Self {
        let layers = layers
            .into_iter()
            .map(|parent_nodes| Layer {
                parent_nodes,
                features: None,
            })
            .collect();

        Self { layers, blocks }
    }

    pub fn num_hops(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, i: usize) -> &Layer {
        &self.layers[i]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, i: usize) -> &Block {
        &self.blocks[i]
    }

    /// The seed nodes this flow was sampled from.
    pub fn seeds(&self) -> &[NodeId] {
        // A flow always has at least one layer.
        self.layers[self.layers.len() - 1].parent_nodes()
    }

    /// Total amount of node slots across all layers.
    pub fn num_nodes(&self) -> usize {
        self.layers.iter().map(Layer::len).sum()
    }

    /// Total amount of edges across all blocks.
    pub fn num_edges(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    /// Fetches and attaches the features of every layer from `provider`.
    ///
    /// # Arguments
    /// * `provider` - The external feature source.
    ///
    /// # Returns
    /// The provider's error if any lookup fails, layers attached before the
    /// failure keep their features.
    pub fn attach_features<P: FeatureProvider>(
        &mut self,
        provider: &P,
    ) -> std::result::Result<(), P::Error> {
        for layer in &mut self.layers {
            let features = provider.features(&layer.parent_nodes)?;
            debug_assert_eq!(features.rows(), layer.len());
            layer.features = Some(features);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    fn two_hop() -> Flow {
        let layers = vec![vec![4, 5], vec![2, 3], vec![1]];
        let blocks = vec![
            Block::new(vec![(0, 0), (1, 1)], vec![10, 11]).unwrap(),
            Block::new(vec![(0, 0), (0, 1)], vec![20, 21]).unwrap(),
        ];

        Flow::from_parts(layers, blocks).unwrap()
    }

    struct IdFeatures;

    impl FeatureProvider for IdFeatures {
        type Error = Infallible;

        fn features(&self, parent_nodes: &[NodeId]) -> std::result::Result<Features, Infallible> {
            let data = parent_nodes.iter().flat_map(|&n| [n as f32, 1.]).collect();
            Ok(Features::new(2, data))
        }
    }

    #[test]
    fn test_flow_accessors() {
        let flow = two_hop();

        assert_eq!(flow.num_hops(), 2);
        assert_eq!(flow.num_layers(), 3);
        assert_eq!(flow.seeds(), [1]);
        assert_eq!(flow.num_nodes(), 5);
        assert_eq!(flow.num_edges(), 4);
        assert_eq!(flow.layer(1).parent(1), Some(3));
        assert_eq!(flow.block(0).parent_edges(), [10, 11]);
    }

    #[test]
    fn test_from_parts_rejects_block_count() {
        let err = Flow::from_parts(vec![vec![0], vec![1]], vec![]).unwrap_err();
        assert!(matches!(err, GraphErr::InvalidFlow(_)));
    }

    #[test]
    fn test_from_parts_rejects_dangling_edge() {
        let block = Block::new(vec![(0, 2)], vec![0]).unwrap();
        let err = Flow::from_parts(vec![vec![7, 8], vec![9]], vec![block]).unwrap_err();
        assert!(matches!(err, GraphErr::InvalidFlow(_)));
    }

    #[test]
    fn test_block_requires_parent_per_edge() {
        assert!(Block::new(vec![(0, 0)], vec![]).is_err());
    }

    #[test]
    fn test_attach_features() {
        let mut flow = two_hop();
        flow.attach_features(&IdFeatures).unwrap();

        let features = flow.layer(1).features().unwrap();
        assert_eq!(features.rows(), 2);
        assert_eq!(features.row(1), [3., 1.]);
    }
}
