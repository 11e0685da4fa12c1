use graph::{FeatureProvider, Features, NodeId};

use crate::storage::{EmbeddingStore, RowUpdater, StoreErr};

/// Feeds a flow's layers with the rows of a store entry.
///
/// Node ids are used as row ids, values are narrowed to `f32`.
pub struct StoreFeatures<'a, U: RowUpdater> {
    store: &'a EmbeddingStore<U>,
    name: &'a str,
}

impl<'a, U: RowUpdater> StoreFeatures<'a, U> {
    /// Creates a new `StoreFeatures`.
    ///
    /// # Arguments
    /// * `store` - The store to read from.
    /// * `name` - The entry holding one row per graph node.
    pub fn new(store: &'a EmbeddingStore<U>, name: &'a str) -> Self {
        Self { store, name }
    }
}

impl<U: RowUpdater> FeatureProvider for StoreFeatures<'_, U> {
    type Error = StoreErr;

    fn features(&self, parent_nodes: &[NodeId]) -> Result<Features, StoreErr> {
        let rows = self.store.pull(self.name, parent_nodes)?;
        let data = rows.to_f64().into_iter().map(|v| v as f32).collect();
        Ok(Features::new(rows.cols(), data))
    }
}
