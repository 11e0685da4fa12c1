//! Immutable graph storage, the layered `Flow` subgraph and the multi-hop
//! neighbor sampler that produces it.

mod error;
mod flow;
mod store;
pub mod sampling;
pub mod traversal;

pub use error::{GraphErr, Result};
pub use flow::{Block, FeatureProvider, Features, Flow, Layer};
pub use store::{Direction, EdgeId, Graph, MAX_EDGE_LIST_NODES, Neighbors, NodeId};
