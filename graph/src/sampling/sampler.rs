use std::{
    collections::VecDeque,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use log::debug;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};
use serde::{Deserialize, Serialize};

use super::{Result, SampleOpts, SamplerErr, sample::sample_unchecked};
use crate::{Direction, Flow, Graph, NodeId};

/// Configuration of a minibatch `NeighborSampler`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Seeds per minibatch, the last minibatch may be shorter.
    pub batch_size: NonZeroUsize,
    pub num_hops: usize,
    pub fanout: usize,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub replace: bool,
    /// Permute the seed order at the start of every pass.
    #[serde(default)]
    pub shuffle: bool,
    /// Size of the sampling thread pool.
    #[serde(default = "SamplerConfig::default_workers")]
    pub num_workers: NonZeroUsize,
    /// Fixes every random draw, making each pass reproducible.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SamplerConfig {
    /// Creates a new `SamplerConfig` following in-edges with a single worker.
    ///
    /// # Arguments
    /// * `batch_size` - Seeds per minibatch.
    /// * `num_hops` - The amount of expansions per flow.
    /// * `fanout` - The maximum neighbors drawn per node and hop.
    pub fn new(batch_size: NonZeroUsize, num_hops: usize, fanout: usize) -> Self {
        Self {
            batch_size,
            num_hops,
            fanout,
            direction: Direction::In,
            replace: false,
            shuffle: false,
            num_workers: Self::default_workers(),
            seed: None,
        }
    }

    fn default_workers() -> NonZeroUsize {
        NonZeroUsize::MIN
    }

    fn opts(&self) -> SampleOpts {
        SampleOpts {
            num_hops: self.num_hops,
            fanout: self.fanout,
            direction: self.direction,
            replace: self.replace,
        }
    }
}

/// Splits a seed set in minibatches and samples one `Flow` per minibatch.
///
/// The sampler is restartable, every call to `iter` starts a new pass over
/// the seeds.
pub struct NeighborSampler {
    graph: Arc<Graph>,
    seeds: Arc<[NodeId]>,
    config: SamplerConfig,
    pool: Arc<ThreadPool>,
    epoch: AtomicU64,
}

impl NeighborSampler {
    /// Creates a new `NeighborSampler`.
    ///
    /// # Arguments
    /// * `graph` - The shared read-only graph.
    /// * `seeds` - Every seed to visit in a pass.
    /// * `config` - The sampler's configuration.
    ///
    /// # Returns
    /// A new sampler, `SamplerErr::UnknownNode` if a seed isn't in `graph` or
    /// `SamplerErr::Pool` if the worker threads can't be spawned.
    pub fn new(graph: Arc<Graph>, seeds: Vec<NodeId>, config: SamplerConfig) -> Result<Self> {
        if let Some(&node) = seeds.iter().find(|&&node| !graph.contains(node)) {
            return Err(SamplerErr::UnknownNode {
                node,
                num_nodes: graph.num_nodes(),
            });
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_workers.get())
            .thread_name(|i| format!("sampler-{i}"))
            .build()?;

        Ok(Self {
            graph,
            seeds: Arc::from(seeds),
            config,
            pool: Arc::new(pool),
            epoch: AtomicU64::new(0),
        })
    }

    /// The amount of flows a full pass yields.
    pub fn num_batches(&self) -> usize {
        self.seeds.len().div_ceil(self.config.batch_size.get())
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Starts a new pass over the seeds.
    pub fn iter(&self) -> FlowIter {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);
        let mut seeds = self.seeds.clone();

        if self.config.shuffle {
            let mut order = seeds.to_vec();
            let mut rng = match self.config.seed {
                Some(seed) => StdRng::seed_from_u64(mix(seed, epoch, u64::MAX)),
                None => StdRng::from_os_rng(),
            };

            order.shuffle(&mut rng);
            seeds = Arc::from(order);
        }

        FlowIter {
            graph: Arc::clone(&self.graph),
            seeds,
            opts: self.config.opts(),
            batch_size: self.config.batch_size.get(),
            workers: self.config.num_workers.get(),
            seed: self.config.seed,
            pool: Arc::clone(&self.pool),
            epoch,
            next_batch: 0,
            ready: VecDeque::new(),
            closed: false,
        }
    }
}

/// A single pass of a `NeighborSampler`.
///
/// Yields one flow per minibatch in minibatch order, `None` once every
/// minibatch was produced or after `close`.
pub struct FlowIter {
    graph: Arc<Graph>,
    seeds: Arc<[NodeId]>,
    opts: SampleOpts,
    batch_size: usize,
    workers: usize,
    seed: Option<u64>,
    pool: Arc<ThreadPool>,
    epoch: u64,
    next_batch: usize,
    ready: VecDeque<Flow>,
    closed: bool,
}

impl FlowIter {
    /// Stops the pass early, discarding any flow sampled ahead.
    pub fn close(&mut self) {
        self.closed = true;
        self.ready.clear();
    }

    fn num_batches(&self) -> usize {
        self.seeds.len().div_ceil(self.batch_size)
    }

    /// Samples the next window of minibatches, one per worker.
    fn fill(&mut self) {
        let start = self.next_batch;
        let end = (start + self.workers).min(self.num_batches());

        if start >= end {
            return;
        }

        let flows: Vec<Flow> = self
            .pool
            .install(|| (start..end).into_par_iter().map(|b| self.sample_batch(b)).collect());

        debug!(epoch = self.epoch, first = start, count = end - start; "sampled minibatches");
        self.ready.extend(flows);
        self.next_batch = end;
    }

    fn sample_batch(&self, batch: usize) -> Flow {
        let start = batch * self.batch_size;
        let end = (start + self.batch_size).min(self.seeds.len());

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(mix(seed, self.epoch, batch as u64)),
            None => StdRng::from_os_rng(),
        };

        sample_unchecked(&self.graph, &self.seeds[start..end], &self.opts, &mut rng)
    }
}

impl Iterator for FlowIter {
    type Item = Flow;

    fn next(&mut self) -> Option<Flow> {
        if self.closed {
            return None;
        }

        if self.ready.is_empty() {
            self.fill();
        }

        self.ready.pop_front()
    }
}

/// Derives an independent stream seed per pass and minibatch.
fn mix(seed: u64, epoch: u64, batch: u64) -> u64 {
    let mut z = seed
        ^ epoch.wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ batch.wrapping_mul(0xbf58_476d_1ce4_e5b9);

    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(n: u64) -> Arc<Graph> {
        let edges = (0..n).flat_map(|i| [(i, (i + 1) % n), (i, (i + 2) % n)]).collect();
        Arc::new(Graph::new(n as usize, edges).unwrap())
    }

    fn config(batch_size: usize, workers: usize) -> SamplerConfig {
        SamplerConfig {
            num_workers: NonZeroUsize::new(workers).unwrap(),
            seed: Some(17),
            ..SamplerConfig::new(NonZeroUsize::new(batch_size).unwrap(), 2, 1)
        }
    }

    #[test]
    fn test_yields_batches_in_order() {
        let sampler = NeighborSampler::new(ring(20), (0..10).collect(), config(3, 2)).unwrap();
        let seeds: Vec<Vec<NodeId>> = sampler.iter().map(|f| f.seeds().to_vec()).collect();

        assert_eq!(sampler.num_batches(), 4);
        assert_eq!(seeds, [vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8], vec![9]]);
    }

    #[test]
    fn test_restartable() {
        let sampler = NeighborSampler::new(ring(12), (0..12).collect(), config(4, 3)).unwrap();

        assert_eq!(sampler.iter().count(), 3);
        assert_eq!(sampler.iter().count(), 3);
    }

    #[test]
    fn test_fixed_seed_is_independent_of_workers() {
        let a = NeighborSampler::new(ring(30), (0..30).collect(), config(5, 1)).unwrap();
        let b = NeighborSampler::new(ring(30), (0..30).collect(), config(5, 4)).unwrap();

        let a: Vec<Flow> = a.iter().collect();
        let b: Vec<Flow> = b.iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shuffle_keeps_every_seed() {
        let config = SamplerConfig {
            shuffle: true,
            ..config(4, 2)
        };
        let sampler = NeighborSampler::new(ring(16), (0..16).collect(), config).unwrap();

        let mut seen: Vec<NodeId> = sampler.iter().flat_map(|f| f.seeds().to_vec()).collect();
        seen.sort();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_close_ends_pass() {
        let sampler = NeighborSampler::new(ring(10), (0..10).collect(), config(2, 2)).unwrap();
        let mut iter = sampler.iter();

        assert!(iter.next().is_some());
        iter.close();
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_rejects_unknown_seed() {
        let res = NeighborSampler::new(ring(4), vec![0, 4], config(2, 1));
        assert!(matches!(res, Err(SamplerErr::UnknownNode { node: 4, .. })));
    }
}
