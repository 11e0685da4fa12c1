use std::collections::{HashMap, HashSet};

use rand::{Rng, seq::index};
use serde::{Deserialize, Serialize};

use super::{Result, SamplerErr};
use crate::{Block, Direction, Flow, Graph, NodeId, traversal};

/// The shape of a single sampling call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleOpts {
    /// The amount of expansions from the seeds.
    pub num_hops: usize,
    /// The maximum amount of neighbors drawn per node and hop.
    pub fanout: usize,
    pub direction: Direction,
    /// Draw neighbors with replacement when a node has more than `fanout` of them.
    #[serde(default)]
    pub replace: bool,
}

/// Samples a `Flow` of `opts.num_hops` hops around `seeds`.
///
/// Duplicated seeds are kept once, in order of first appearance.
///
/// # Arguments
/// * `graph` - The graph to sample from.
/// * `seeds` - The nodes making up the outermost layer.
/// * `opts` - Hops, fan-out and direction of the expansion.
/// * `rng` - The source of every neighbor draw.
///
/// # Returns
/// The sampled flow or `SamplerErr::UnknownNode` if a seed isn't in `graph`.
pub fn sample_flow<R>(graph: &Graph, seeds: &[NodeId], opts: &SampleOpts, rng: &mut R) -> Result<Flow>
where
    R: Rng + ?Sized,
{
    if let Some(&node) = seeds.iter().find(|&&node| !graph.contains(node)) {
        return Err(SamplerErr::UnknownNode {
            node,
            num_nodes: graph.num_nodes(),
        });
    }

    Ok(sample_unchecked(graph, seeds, opts, rng))
}

/// Same as `sample_flow` for seeds already known to belong to `graph`.
pub(super) fn sample_unchecked<R>(graph: &Graph, seeds: &[NodeId], opts: &SampleOpts, rng: &mut R) -> Flow
where
    R: Rng + ?Sized,
{
    let mut seen = HashSet::with_capacity(seeds.len());
    let outer = seeds.iter().copied().filter(|&s| seen.insert(s)).collect();

    // Built outermost first and flipped at the end.
    let mut layers: Vec<Vec<NodeId>> = vec![outer];
    let mut blocks = Vec::with_capacity(opts.num_hops);
    let mut picks = Vec::new();

    for _ in 0..opts.num_hops {
        let frontier = &layers[layers.len() - 1];
        let mut inner = Vec::new();
        let mut local_ids = HashMap::new();
        let mut block = Block::default();

        for (src, (_, neighbors)) in traversal::neighborhoods(graph, frontier, opts.direction).enumerate() {
            choose(neighbors.len(), opts, rng, &mut picks);

            for &pick in &picks {
                let node = neighbors.nodes()[pick];
                let dst = *local_ids.entry(node).or_insert_with(|| {
                    inner.push(node);
                    (inner.len() - 1) as u32
                });

                block.push(src as u32, dst, neighbors.edges()[pick]);
            }
        }

        layers.push(inner);
        blocks.push(block);
    }

    layers.reverse();
    blocks.reverse();
    Flow::from_sampled(layers, blocks)
}

/// Fills `picks` with the neighbor positions drawn for a node of `degree` neighbors.
fn choose<R>(degree: usize, opts: &SampleOpts, rng: &mut R, picks: &mut Vec<usize>)
where
    R: Rng + ?Sized,
{
    picks.clear();

    if degree <= opts.fanout {
        picks.extend(0..degree);
    } else if opts.replace {
        picks.extend((0..opts.fanout).map(|_| rng.random_range(0..degree)));
    } else {
        picks.extend(index::sample(rng, degree, opts.fanout));
        picks.sort_unstable();
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    /// 10 nodes, `0 -> 1..=8`, `1..=8 -> 9` and `9 -> 0`.
    fn fan_graph() -> Graph {
        let mut edges: Vec<_> = (1..=8).map(|n| (0, n)).collect();
        edges.extend((1..=8).map(|n| (n, 9)));
        edges.push((9, 0));
        Graph::new(10, edges).unwrap()
    }

    fn opts(num_hops: usize, fanout: usize, direction: Direction) -> SampleOpts {
        SampleOpts {
            num_hops,
            fanout,
            direction,
            replace: false,
        }
    }

    fn out_degree_per_src(block: &Block, outer: usize) -> Vec<usize> {
        let mut counts = vec![0; outer];
        block.edges().iter().for_each(|&(src, _)| counts[src as usize] += 1);
        counts
    }

    #[test]
    fn test_single_hop_takes_whole_neighborhood() {
        let g = fan_graph();
        let mut rng = StdRng::seed_from_u64(7);
        let flow = sample_flow(&g, &[9], &opts(1, 8, Direction::In), &mut rng).unwrap();

        assert_eq!(flow.num_layers(), 2);
        assert_eq!(flow.seeds(), [9]);

        let mut inner = flow.layer(0).parent_nodes().to_vec();
        inner.sort();
        assert_eq!(inner, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(flow.block(0).len(), 8);
    }

    #[test]
    fn test_fanout_caps_high_degree_node() {
        let g = fan_graph();
        let mut rng = StdRng::seed_from_u64(3);
        let flow = sample_flow(&g, &[0], &opts(1, 5, Direction::Out), &mut rng).unwrap();

        assert_eq!(flow.block(0).len(), 5);
        assert_eq!(flow.layer(0).len(), 5);

        for (&(_, dst), &edge) in flow.block(0).edges().iter().zip(flow.block(0).parent_edges()) {
            let (src, target) = g.edge(edge).unwrap();
            assert_eq!(src, 0);
            assert_eq!(flow.layer(0).parent(dst), Some(target));
        }
    }

    #[test]
    fn test_edges_per_node_is_min_of_fanout_and_degree() {
        let g = fan_graph();
        let mut rng = StdRng::seed_from_u64(11);
        let o = opts(3, 3, Direction::In);
        let flow = sample_flow(&g, &[9, 0, 4], &o, &mut rng).unwrap();

        for i in 0..flow.num_hops() {
            let outer = flow.layer(i + 1);
            let counts = out_degree_per_src(flow.block(i), outer.len());

            for (local, &node) in outer.parent_nodes().iter().enumerate() {
                let expected = g.degree(node, Direction::In).min(o.fanout);
                assert_eq!(counts[local], expected, "node {node} at layer {}", i + 1);
            }
        }
    }

    #[test]
    fn test_replacement_draws_exactly_fanout() {
        let g = fan_graph();
        let mut rng = StdRng::seed_from_u64(5);
        let o = SampleOpts {
            replace: true,
            ..opts(1, 4, Direction::Out)
        };
        let flow = sample_flow(&g, &[0], &o, &mut rng).unwrap();

        assert_eq!(flow.block(0).len(), 4);
        assert!(flow.layer(0).len() <= 4);
    }

    #[test]
    fn test_seeds_are_deduplicated_in_order() {
        let g = fan_graph();
        let mut rng = StdRng::seed_from_u64(1);
        let flow = sample_flow(&g, &[3, 1, 3, 2, 1], &opts(2, 2, Direction::In), &mut rng).unwrap();

        assert_eq!(flow.seeds(), [3, 1, 2]);
        assert_eq!(flow.num_layers(), 3);
    }

    #[test]
    fn test_isolated_seed() {
        let g = Graph::new(3, vec![(0, 1)]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let flow = sample_flow(&g, &[2], &opts(2, 4, Direction::In), &mut rng).unwrap();

        assert_eq!(flow.seeds(), [2]);
        assert!(flow.layer(0).is_empty());
        assert!(flow.layer(1).is_empty());
        assert_eq!(flow.num_edges(), 0);
    }

    #[test]
    fn test_zero_hops_is_seed_layer_only() {
        let g = fan_graph();
        let mut rng = StdRng::seed_from_u64(0);
        let flow = sample_flow(&g, &[1, 2], &opts(0, 4, Direction::In), &mut rng).unwrap();

        assert_eq!(flow.num_layers(), 1);
        assert_eq!(flow.num_hops(), 0);
        assert_eq!(flow.seeds(), [1, 2]);
    }

    #[test]
    fn test_same_seed_same_flow() {
        let g = fan_graph();
        let o = opts(2, 3, Direction::Out);

        let a = sample_flow(&g, &[0, 9], &o, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = sample_flow(&g, &[0, 9], &o, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_seed() {
        let g = fan_graph();
        let mut rng = StdRng::seed_from_u64(0);
        let err = sample_flow(&g, &[1, 10], &opts(1, 1, Direction::In), &mut rng).unwrap_err();

        assert!(matches!(err, SamplerErr::UnknownNode { node: 10, num_nodes: 10 }));
    }
}
