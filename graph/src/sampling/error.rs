use std::{error::Error, fmt};

use rayon::ThreadPoolBuildError;

use crate::NodeId;

/// The sampling module's result type.
pub type Result<T> = std::result::Result<T, SamplerErr>;

/// Failures while setting up or running a sampler.
///
/// Running out of minibatches is not an error, a `FlowIter` simply yields `None`.
#[derive(Debug)]
pub enum SamplerErr {
    UnknownNode { node: NodeId, num_nodes: usize },
    Pool(ThreadPoolBuildError),
}

impl fmt::Display for SamplerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerErr::UnknownNode { node, num_nodes } => {
                write!(f, "seed {node} is not part of a graph of {num_nodes} nodes")
            }
            SamplerErr::Pool(e) => write!(f, "failed to build the sampling pool: {e}"),
        }
    }
}

impl Error for SamplerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SamplerErr::Pool(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ThreadPoolBuildError> for SamplerErr {
    fn from(value: ThreadPoolBuildError) -> Self {
        Self::Pool(value)
    }
}
