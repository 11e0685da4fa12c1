mod error;
mod sample;
mod sampler;

pub use error::{Result, SamplerErr};
pub use sample::{SampleOpts, sample_flow};
pub use sampler::{FlowIter, NeighborSampler, SamplerConfig};
