use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};

use graph::Graph;
use log::{debug, info};
use parking_lot::{FairMutex, RwLock};
use serde::Deserialize;

use super::{Entry, Overwrite, Result, RowUpdater, Schema, StoreErr, Tensor};
use crate::compute::{self, GraphUpdate, Rows};

/// The entry holding the latest serialized `GraphUpdate` instead of rows.
pub const GRAPH_UPDATE_KEY: &str = "__graph_update__";

const DEFAULT_SHARDS: usize = 8;

/// Configuration of an `EmbeddingStore`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StoreConfig {
    /// The amount of row maps every entry is spread over.
    #[serde(default = "default_shards")]
    pub shards: NonZeroUsize,
}

fn default_shards() -> NonZeroUsize {
    // SAFETY: The default is a non zero constant.
    NonZeroUsize::new(DEFAULT_SHARDS).unwrap()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
        }
    }
}

type Slot = Arc<FairMutex<Entry>>;

/// A named collection of row sharded tensors.
///
/// Every entry sits behind its own fair lock, so operations on different names
/// never wait on each other and waiters on the same name are served in order.
/// The control entry `GRAPH_UPDATE_KEY` has its own lock as well, taken for
/// the whole duration of a full graph pass.
///
/// These methods are blocking, inside an async runtime use a `StoreHandle`.
#[derive(Debug)]
pub struct EmbeddingStore<U: RowUpdater = Overwrite> {
    config: StoreConfig,
    entries: RwLock<HashMap<String, Slot>>,
    control: FairMutex<Option<String>>,
    graph: Option<Arc<Graph>>,
    updater: U,
}

impl EmbeddingStore {
    /// Creates a new `EmbeddingStore` where pushes overwrite rows.
    ///
    /// # Arguments
    /// * `config` - The store's configuration.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_updater(config, Overwrite)
    }
}

impl<U: RowUpdater> EmbeddingStore<U> {
    /// Creates a new `EmbeddingStore` that merges pushes with `updater`.
    ///
    /// # Arguments
    /// * `config` - The store's configuration.
    /// * `updater` - The merge policy of every push.
    pub fn with_updater(config: StoreConfig, updater: U) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            control: FairMutex::new(None),
            graph: None,
            updater,
        }
    }

    /// Attaches the graph full graph updates run over.
    pub fn with_graph(mut self, graph: Arc<Graph>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn graph(&self) -> Option<&Arc<Graph>> {
        self.graph.as_ref()
    }

    pub fn config(&self) -> StoreConfig {
        self.config
    }

    /// The names of every data entry, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Returns the schema `name` was initialized with.
    pub fn schema(&self, name: &str) -> Result<Schema> {
        Ok(self.slot(name)?.lock().schema())
    }

    /// The amount of rows of `name` that were ever written.
    pub fn materialized(&self, name: &str) -> Result<usize> {
        Ok(self.slot(name)?.lock().materialized())
    }

    fn slot(&self, name: &str) -> Result<Slot> {
        if name == GRAPH_UPDATE_KEY {
            return Err(StoreErr::ReservedKey(name.to_string()));
        }

        self.entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreErr::UnknownKey(name.to_string()))
    }

    /// Declares the entry `name`.
    ///
    /// Initializing an existing entry with the same schema does nothing, with
    /// a different one replaces it with an empty entry.
    ///
    /// # Arguments
    /// * `name` - The entry's name.
    /// * `schema` - Its shape and element type.
    ///
    /// # Returns
    /// A `ReservedKey` error for `GRAPH_UPDATE_KEY` or a `SchemaMismatch` if
    /// the schema has no columns.
    pub fn init(&self, name: &str, schema: Schema) -> Result<()> {
        if name == GRAPH_UPDATE_KEY {
            return Err(StoreErr::ReservedKey(name.to_string()));
        }

        if schema.cols == 0 {
            return StoreErr::mismatch(name, "rows must have at least one column");
        }

        let mut entries = self.entries.write();

        if let Some(slot) = entries.get(name) {
            let current = slot.lock().schema();
            if current == schema {
                return Ok(());
            }

            info!(name = name; "replacing entry, schema changed from {current:?} to {schema:?}");
        } else {
            debug!(name = name, rows = schema.rows, cols = schema.cols; "new entry");
        }

        let entry = Entry::new(schema, self.config.shards);
        entries.insert(name.to_string(), Arc::new(FairMutex::new(entry)));
        Ok(())
    }

    /// Reads the rows of `ids` from `name`.
    ///
    /// # Returns
    /// One row per id in the order of `ids`, zeros for rows never pushed, in
    /// the entry's dtype. A `SchemaMismatch` if an id is out of range.
    pub fn pull(&self, name: &str, ids: &[u64]) -> Result<Tensor> {
        let (schema, values) = self.pull_f64(name, ids)?;
        Ok(Tensor::cast(ids.len(), schema.cols, schema.dtype, values))
    }

    fn pull_f64(&self, name: &str, ids: &[u64]) -> Result<(Schema, Vec<f64>)> {
        let slot = self.slot(name)?;
        let entry = slot.lock();
        let schema = entry.schema();
        check_ids(name, &schema, ids)?;

        let mut out = vec![0.; ids.len() * schema.cols];
        entry.pull(ids, &mut out);
        Ok((schema, out))
    }

    /// Writes `values` into the rows of `ids` of `name`.
    ///
    /// With the default `Overwrite` policy the pushed rows replace the stored
    /// ones and concurrent pushes of the same row are not merged: this is an
    /// approximation of gradient accumulation, the last writer wins. Within a
    /// single push a repeated id keeps its last row.
    ///
    /// # Arguments
    /// * `name` - The entry to write.
    /// * `ids` - The rows to write.
    /// * `values` - One row per id, matching the entry's columns and dtype.
    ///
    /// # Returns
    /// A `SchemaMismatch` if ids or values don't fit the schema, in which
    /// case nothing was written.
    pub fn push(&self, name: &str, ids: &[u64], values: &Tensor) -> Result<()> {
        self.write(name, ids, values, &self.updater)
    }

    fn write<R: RowUpdater>(&self, name: &str, ids: &[u64], values: &Tensor, updater: &R) -> Result<()> {
        let slot = self.slot(name)?;
        let mut entry = slot.lock();
        let schema = entry.schema();
        check_ids(name, &schema, ids)?;
        check_values(name, &schema, ids.len(), values)?;

        entry.push(ids, &values.to_f64(), updater);
        Ok(())
    }

    /// Runs one full graph pass described by `update`.
    ///
    /// Inline parameters are stored under their own names first, then the
    /// detached descriptor is recorded as the control entry and executed: the
    /// parameters are read back, every node aggregates its neighbors and the
    /// results overwrite the rows of `update.out`. The output entry is created
    /// with one row per node if it doesn't exist.
    ///
    /// # Returns
    /// `NoGraph` if the store has no graph, otherwise any error of reading
    /// the inputs or writing the output.
    pub fn update_all(&self, mut update: GraphUpdate) -> Result<()> {
        let graph = self.graph.clone().ok_or(StoreErr::NoGraph)?;

        for (name, value) in update.detach() {
            let ids: Vec<u64> = (0..value.rows() as u64).collect();
            self.init(&name, value.schema())?;
            self.write(&name, &ids, &value, &Overwrite)?;
        }

        let json = update.to_json()?;
        let mut control = self.control.lock();
        let json = control.insert(json);

        self.run_graph_update(&graph, json)
    }

    /// The descriptor of the latest full graph pass, with detached parameters.
    pub fn last_update(&self) -> Result<Option<GraphUpdate>> {
        self.control
            .lock()
            .as_deref()
            .map(GraphUpdate::from_json)
            .transpose()
    }

    fn run_graph_update(&self, graph: &Graph, json: &str) -> Result<()> {
        let mut update = GraphUpdate::from_json(json)?;
        self.attach_params(&mut update)?;

        let n = graph.num_nodes();
        let (schema, field) = self.snapshot(update.message.field(), n)?;
        let other = match update.message.other() {
            Some(other) => Some(self.snapshot(other, n)?),
            None => None,
        };

        let rows = compute::full_graph(
            graph,
            &update,
            Rows {
                cols: schema.cols,
                values: &field,
            },
            other.as_ref().map(|(schema, values)| Rows {
                cols: schema.cols,
                values,
            }),
        )?;

        let cols = compute::output_cols(&update, schema.cols)?;
        let out = &update.out;

        let slot = match self.slot(out) {
            Err(StoreErr::UnknownKey(_)) => {
                self.init(out, Schema::new(n as u64, cols, schema.dtype))?;
                self.slot(out)?
            }
            res => res?,
        };

        let mut entry = slot.lock();
        let out_schema = entry.schema();

        if out_schema.rows < n as u64 || out_schema.cols != cols {
            let reason = format!("needs {n} rows of {cols} values, has {out_schema:?}");
            return StoreErr::mismatch(out, reason);
        }

        let ids: Vec<u64> = (0..n as u64).collect();
        entry.push(&ids, &rows, &Overwrite);

        info!(out = out.as_str(), nodes = n; "full graph update done");
        Ok(())
    }

    /// Reads the first `n` rows of `name`, the entry must have at least `n` rows.
    fn snapshot(&self, name: &str, n: usize) -> Result<(Schema, Vec<f64>)> {
        let schema = self.schema(name)?;

        if schema.rows < n as u64 {
            let reason = format!("the graph has {n} nodes, the entry only {} rows", schema.rows);
            return StoreErr::mismatch(name, reason);
        }

        let ids: Vec<u64> = (0..n as u64).collect();
        self.pull_f64(name, &ids)
    }

    fn attach_params(&self, update: &mut GraphUpdate) -> Result<()> {
        for param in update.params_mut() {
            let schema = self.schema(&param.name)?;
            let ids: Vec<u64> = (0..schema.rows).collect();
            param.value = Some(self.pull(&param.name, &ids)?);
        }

        Ok(())
    }
}

fn check_ids(name: &str, schema: &Schema, ids: &[u64]) -> Result<()> {
    match ids.iter().find(|&&id| id >= schema.rows) {
        Some(id) => StoreErr::mismatch(name, format!("row {id} out of range 0..{}", schema.rows)),
        None => Ok(()),
    }
}

fn check_values(name: &str, schema: &Schema, rows: usize, values: &Tensor) -> Result<()> {
    if values.dtype() != schema.dtype {
        let reason = format!("expected {:?} values, got {:?}", schema.dtype, values.dtype());
        return StoreErr::mismatch(name, reason);
    }

    if values.cols() != schema.cols {
        let reason = format!("expected rows of {} values, got {}", schema.cols, values.cols());
        return StoreErr::mismatch(name, reason);
    }

    if values.rows() != rows || values.data().len() != rows * schema.cols {
        let reason = format!(
            "expected {rows} rows of {} values, got {} values",
            schema.cols,
            values.data().len()
        );
        return StoreErr::mismatch(name, reason);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::thread;

    use graph::Direction;

    use super::*;
    use crate::{
        compute::{MessageFn, NodeUpdateFn, Param, ReduceFn},
        storage::{Accumulate, Dtype, ErrKind},
    };

    fn store() -> EmbeddingStore {
        EmbeddingStore::new(StoreConfig {
            shards: NonZeroUsize::new(3).unwrap(),
        })
    }

    fn rows(values: &[f32], cols: usize) -> Tensor {
        Tensor::from_f32(values.len() / cols, cols, values.to_vec())
    }

    #[test]
    fn test_pull_after_push_follows_ids_order() {
        let store = store();
        store.init("h", Schema::new(10, 2, Dtype::F32)).unwrap();
        store.push("h", &[3, 7], &rows(&[1., 2., 3., 4.], 2)).unwrap();

        let pulled = store.pull("h", &[7, 0, 3]).unwrap();
        assert_eq!(pulled.rows(), 3);
        assert_eq!(pulled.as_f32().unwrap(), [3., 4., 0., 0., 1., 2.]);
        assert_eq!(store.materialized("h").unwrap(), 2);
    }

    #[test]
    fn test_f64_entries_keep_precision() {
        let store = store();
        store.init("x", Schema::new(2, 1, Dtype::F64)).unwrap();

        let value = 1. + f64::EPSILON;
        store.push("x", &[1], &Tensor::from_f64(1, 1, vec![value])).unwrap();
        assert_eq!(store.pull("x", &[1]).unwrap().as_f64().unwrap(), [value]);
    }

    #[test]
    fn test_reinit() {
        let store = store();
        let schema = Schema::new(4, 1, Dtype::F32);
        store.init("h", schema).unwrap();
        store.push("h", &[0], &rows(&[5.], 1)).unwrap();

        store.init("h", schema).unwrap();
        assert_eq!(store.pull("h", &[0]).unwrap().as_f32().unwrap(), [5.]);

        let wider = Schema::new(4, 2, Dtype::F32);
        store.init("h", wider).unwrap();
        assert_eq!(store.schema("h").unwrap(), wider);
        assert_eq!(store.pull("h", &[0]).unwrap().as_f32().unwrap(), [0., 0.]);
    }

    #[test]
    fn test_mismatches_leave_entry_untouched() {
        let store = store();
        store.init("h", Schema::new(4, 2, Dtype::F32)).unwrap();
        store.push("h", &[1], &rows(&[1., 1.], 2)).unwrap();

        let bad = [
            store.push("h", &[1], &rows(&[9., 9., 9.], 3)),
            store.push("h", &[1], &Tensor::from_f64(1, 2, vec![9., 9.])),
            store.push("h", &[1, 4], &rows(&[9., 9., 9., 9.], 2)),
            store.push("h", &[1, 2], &rows(&[9., 9.], 2)),
            store.pull("h", &[0, 4]).map(|_| ()),
        ];

        for res in bad {
            assert_eq!(res.unwrap_err().kind(), ErrKind::SchemaMismatch);
        }

        assert_eq!(store.pull("h", &[1]).unwrap().as_f32().unwrap(), [1., 1.]);
        assert_eq!(store.materialized("h").unwrap(), 1);
    }

    #[test]
    fn test_unknown_and_reserved_keys() {
        let store = store();
        let err = store.pull("missing", &[0]).unwrap_err();
        assert!(matches!(err, StoreErr::UnknownKey(name) if name == "missing"));

        let schema = Schema::new(1, 1, Dtype::F32);
        let err = store.init(GRAPH_UPDATE_KEY, schema).unwrap_err();
        assert_eq!(err.kind(), ErrKind::ReservedKey);

        let err = store.init("empty", Schema::new(1, 0, Dtype::F32)).unwrap_err();
        assert_eq!(err.kind(), ErrKind::SchemaMismatch);
    }

    #[test]
    fn test_accumulating_store() {
        let config = StoreConfig::default();
        let store = EmbeddingStore::with_updater(config, Accumulate);
        store.init("g", Schema::new(2, 1, Dtype::F32)).unwrap();

        store.push("g", &[0], &rows(&[1.], 1)).unwrap();
        store.push("g", &[0], &rows(&[2.], 1)).unwrap();
        assert_eq!(store.pull("g", &[0]).unwrap().as_f32().unwrap(), [3.]);
    }

    #[test]
    fn test_concurrent_pushes_on_different_names() {
        let store = Arc::new(store());

        thread::scope(|s| {
            for t in 0..4u64 {
                let store = &store;
                s.spawn(move || {
                    let name = format!("e{t}");
                    store.init(&name, Schema::new(100, 1, Dtype::F32)).unwrap();

                    for id in 0..100 {
                        store.push(&name, &[id], &rows(&[(t * id) as f32], 1)).unwrap();
                    }
                });
            }
        });

        let mut names = store.names();
        names.sort();
        assert_eq!(names, ["e0", "e1", "e2", "e3"]);
        assert_eq!(store.pull("e3", &[10]).unwrap().as_f32().unwrap(), [30.]);
    }

    fn fan_graph() -> Arc<Graph> {
        // 0 -> 2, 1 -> 2, 2 -> 0
        Arc::new(Graph::new(3, vec![(0, 2), (1, 2), (2, 0)]).unwrap())
    }

    #[test]
    fn test_update_all_without_graph() {
        let store = store();
        let update = GraphUpdate {
            message: MessageFn::CopySrc { field: "h".into() },
            reduce: ReduceFn::Sum,
            update: NodeUpdateFn::Identity,
            direction: Direction::In,
            out: "h".into(),
        };

        assert!(matches!(store.update_all(update), Err(StoreErr::NoGraph)));
    }

    #[test]
    fn test_update_all_in_place() {
        let store = store().with_graph(fan_graph());
        store.init("h", Schema::new(3, 1, Dtype::F32)).unwrap();
        store.push("h", &[0, 1, 2], &rows(&[1., 2., 4.], 1)).unwrap();

        let update = GraphUpdate {
            message: MessageFn::CopySrc { field: "h".into() },
            reduce: ReduceFn::Sum,
            update: NodeUpdateFn::Identity,
            direction: Direction::In,
            out: "h".into(),
        };

        store.update_all(update.clone()).unwrap();
        assert_eq!(store.pull("h", &[0, 1, 2]).unwrap().as_f32().unwrap(), [4., 0., 3.]);
        assert_eq!(store.last_update().unwrap(), Some(update));
    }

    #[test]
    fn test_update_all_stores_inline_params() {
        let store = store().with_graph(fan_graph());
        store.init("h", Schema::new(3, 2, Dtype::F32)).unwrap();
        store.push("h", &[0, 1, 2], &rows(&[1., 0., 0., 1., 1., 1.], 2)).unwrap();

        let weight = Tensor::from_f32(2, 1, vec![2., 3.]);
        let update = GraphUpdate {
            message: MessageFn::CopySrc { field: "h".into() },
            reduce: ReduceFn::Sum,
            update: NodeUpdateFn::Linear {
                weight: Param::inline("w", weight.clone()),
                bias: None,
                activation: None,
            },
            direction: Direction::In,
            out: "z".into(),
        };

        store.update_all(update).unwrap();

        assert_eq!(store.schema("z").unwrap(), Schema::new(3, 1, Dtype::F32));
        assert_eq!(store.pull("z", &[0, 1, 2]).unwrap().as_f32().unwrap(), [5., 0., 5.]);
        assert_eq!(store.pull("w", &[0, 1]).unwrap(), weight);

        let recorded = store.last_update().unwrap().unwrap();
        assert!(recorded.is_detached());
    }

    #[test]
    fn test_update_all_missing_param() {
        let store = store().with_graph(fan_graph());
        store.init("h", Schema::new(3, 1, Dtype::F32)).unwrap();

        let update = GraphUpdate {
            message: MessageFn::CopySrc { field: "h".into() },
            reduce: ReduceFn::Mean,
            update: NodeUpdateFn::Linear {
                weight: Param::named("nope"),
                bias: None,
                activation: None,
            },
            direction: Direction::In,
            out: "z".into(),
        };

        let err = store.update_all(update).unwrap_err();
        assert_eq!(err.kind(), ErrKind::UnknownKey);
        assert!(store.schema("z").is_err());
    }

    #[test]
    fn test_update_all_rejects_short_entries() {
        let store = store().with_graph(fan_graph());
        store.init("h", Schema::new(2, 1, Dtype::F32)).unwrap();

        let update = GraphUpdate {
            message: MessageFn::CopySrc { field: "h".into() },
            reduce: ReduceFn::Sum,
            update: NodeUpdateFn::Identity,
            direction: Direction::In,
            out: "z".into(),
        };

        let err = store.update_all(update).unwrap_err();
        assert_eq!(err.kind(), ErrKind::SchemaMismatch);
    }
}
