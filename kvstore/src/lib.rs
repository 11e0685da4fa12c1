//! A row sharded embedding store with server side full-graph aggregation,
//! usable in process or over the network.

pub mod compute;
mod features;
pub mod service;
mod storage;

pub use features::StoreFeatures;
pub use service::{KvClient, KvServer};
pub use storage::{
    Accumulate, Dtype, EmbeddingStore, ErrKind, GRAPH_UPDATE_KEY, Overwrite, Result, RowUpdater,
    Schema, StoreConfig, StoreErr, StoreHandle, Tensor, TensorData,
};
