use std::{ops::Deref, sync::Arc};

use tokio::task;

use super::{EmbeddingStore, Overwrite, Result, RowUpdater, Schema, Tensor};
use crate::compute::GraphUpdate;

/// The async interface to a shared `EmbeddingStore`.
///
/// It bridges the async runtime with the blocking, CPU-bound implementation
/// of the store. Requires the multi threaded runtime.
pub struct StoreHandle<U: RowUpdater = Overwrite>(Arc<EmbeddingStore<U>>);

impl<U: RowUpdater> Clone for StoreHandle<U> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<U: RowUpdater> Deref for StoreHandle<U> {
    type Target = EmbeddingStore<U>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<U: RowUpdater> StoreHandle<U> {
    /// Creates a new `StoreHandle`.
    ///
    /// # Arguments
    /// * `store` - The underlying embedding store.
    pub fn new(store: EmbeddingStore<U>) -> Self {
        Self(Arc::new(store))
    }

    /// Async call to the synchronous implementation of `EmbeddingStore::init`.
    pub async fn init(&self, name: &str, schema: Schema) -> Result<()> {
        task::block_in_place(|| self.0.init(name, schema))
    }

    /// Async call to the synchronous implementation of `EmbeddingStore::pull`.
    pub async fn pull(&self, name: &str, ids: &[u64]) -> Result<Tensor> {
        task::block_in_place(|| self.0.pull(name, ids))
    }

    /// Async call to the synchronous implementation of `EmbeddingStore::push`.
    pub async fn push(&self, name: &str, ids: &[u64], values: &Tensor) -> Result<()> {
        task::block_in_place(|| self.0.push(name, ids, values))
    }

    /// Async call to the synchronous implementation of `EmbeddingStore::update_all`.
    pub async fn update_all(&self, update: GraphUpdate) -> Result<()> {
        task::block_in_place(|| self.0.update_all(update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Dtype, StoreConfig};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handles_share_the_store() {
        let handle = StoreHandle::new(EmbeddingStore::new(StoreConfig::default()));
        let other = handle.clone();

        handle.init("h", Schema::new(4, 1, Dtype::F32)).await.unwrap();

        let task = tokio::spawn(async move {
            let values = Tensor::from_f32(1, 1, vec![2.5]);
            other.push("h", &[3], &values).await.unwrap();
        });
        task.await.unwrap();

        let pulled = handle.pull("h", &[3]).await.unwrap();
        assert_eq!(pulled.as_f32().unwrap(), [2.5]);
        assert_eq!(handle.materialized("h").unwrap(), 1);
    }
}
