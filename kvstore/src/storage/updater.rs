/// Defines how a pushed row is merged into the stored one.
///
/// The updater is owned by the store and lent to every write, so any state it
/// keeps is shared by all the entries of that store.
pub trait RowUpdater: Send + Sync {
    /// Merges `incoming` into `row`, both have the entry's row length.
    ///
    /// # Arguments
    /// * `row` - The stored row, zeros if it was never written.
    /// * `incoming` - The pushed values.
    fn update(&self, row: &mut [f64], incoming: &[f64]);
}

/// Replaces the stored row with the pushed one.
///
/// Concurrent pushes to the same row from different trainers are not merged,
/// the last write wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overwrite;

impl RowUpdater for Overwrite {
    fn update(&self, row: &mut [f64], incoming: &[f64]) {
        row.copy_from_slice(incoming);
    }
}

/// Adds the pushed row to the stored one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accumulate;

impl RowUpdater for Accumulate {
    fn update(&self, row: &mut [f64], incoming: &[f64]) {
        row.iter_mut().zip(incoming).for_each(|(r, v)| *r += v);
    }
}
