use std::{collections::HashMap, num::NonZeroUsize};

use rayon::prelude::*;

use crate::storage::{RowUpdater, Schema};

type Row = Box<[f64]>;

/// The rows of a single named entry, spread over several hash maps by `row_id % shards`.
///
/// Only rows that were written are materialized, values are kept widened to
/// `f64` whatever the entry's dtype. The caller is expected to have validated
/// ids and values against the schema.
#[derive(Debug)]
pub(super) struct Entry {
    schema: Schema,
    shards: Vec<HashMap<u64, Row>>,
}

impl Entry {
    /// Creates a new empty `Entry`.
    ///
    /// # Arguments
    /// * `schema` - The entry's schema, `cols` must not be zero.
    /// * `shards` - The amount of row maps.
    pub fn new(schema: Schema, shards: NonZeroUsize) -> Self {
        Self {
            schema,
            shards: (0..shards.get()).map(|_| HashMap::new()).collect(),
        }
    }

    pub fn schema(&self) -> Schema {
        self.schema
    }

    /// The amount of rows written so far.
    pub fn materialized(&self) -> usize {
        self.shards.iter().map(HashMap::len).sum()
    }

    fn shard_of(&self, id: u64) -> usize {
        (id % self.shards.len() as u64) as usize
    }

    /// Copies the rows of `ids` into `out` in order, rows never written are zeros.
    ///
    /// # Arguments
    /// * `ids` - The rows to read.
    /// * `out` - Exactly `ids.len() * cols` values.
    pub fn pull(&self, ids: &[u64], out: &mut [f64]) {
        out.par_chunks_mut(self.schema.cols)
            .zip(ids.par_iter())
            .for_each(|(row, &id)| match self.shards[self.shard_of(id)].get(&id) {
                Some(stored) => row.copy_from_slice(stored),
                None => row.fill(0.),
            });
    }

    /// Merges `values` into the rows of `ids` through `updater`.
    ///
    /// Every shard applies its own rows in parallel, rows of the same shard in
    /// the order of `ids`, so a repeated id keeps its last value under `Overwrite`.
    ///
    /// # Arguments
    /// * `ids` - The rows to write.
    /// * `values` - Exactly `ids.len() * cols` values.
    /// * `updater` - The merge policy.
    pub fn push<U: RowUpdater>(&mut self, ids: &[u64], values: &[f64], updater: &U) {
        let cols = self.schema.cols;
        let mut groups = vec![Vec::new(); self.shards.len()];

        for (i, &id) in ids.iter().enumerate() {
            groups[self.shard_of(id)].push(i);
        }

        self.shards
            .par_iter_mut()
            .zip(groups)
            .for_each(|(shard, group)| {
                for i in group {
                    let row = shard
                        .entry(ids[i])
                        .or_insert_with(|| vec![0.; cols].into_boxed_slice());

                    updater.update(row, &values[i * cols..(i + 1) * cols]);
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Accumulate, Dtype, Overwrite};

    fn entry(shards: usize) -> Entry {
        Entry::new(Schema::new(100, 2, Dtype::F32), NonZeroUsize::new(shards).unwrap())
    }

    #[test]
    fn test_unwritten_rows_are_zero() {
        let mut e = entry(3);
        e.push(&[4], &[1., 2.], &Overwrite);

        let mut out = [9.; 6];
        e.pull(&[0, 4, 99], &mut out);
        assert_eq!(out, [0., 0., 1., 2., 0., 0.]);
        assert_eq!(e.materialized(), 1);
    }

    #[test]
    fn test_rows_spread_over_shards() {
        let mut e = entry(4);
        let ids: Vec<u64> = (0..10).collect();
        let values: Vec<f64> = (0..20).map(|v| v as f64).collect();
        e.push(&ids, &values, &Overwrite);

        assert!(e.shards.iter().all(|shard| !shard.is_empty()));
        assert_eq!(e.shards[1].len(), 3);

        let mut out = vec![0.; 20];
        e.pull(&ids, &mut out);
        assert_eq!(out, values);
    }

    #[test]
    fn test_repeated_id_last_wins() {
        let mut e = entry(2);
        e.push(&[7, 3, 7], &[1., 1., 2., 2., 3., 3.], &Overwrite);

        let mut out = [0.; 4];
        e.pull(&[7, 3], &mut out);
        assert_eq!(out, [3., 3., 2., 2.]);
    }

    #[test]
    fn test_accumulate_starts_from_zero() {
        let mut e = entry(1);
        e.push(&[1, 1], &[1., 2., 10., 20.], &Accumulate);

        let mut out = [0.; 2];
        e.pull(&[1], &mut out);
        assert_eq!(out, [11., 22.]);
    }
}
