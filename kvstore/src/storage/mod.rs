mod entry;
mod error;
mod handle;
mod schema;
mod store;
mod updater;

use entry::Entry;
pub use error::{ErrKind, Result, StoreErr};
pub use handle::StoreHandle;
pub(crate) use schema::read_unaligned;
pub use schema::{Dtype, Schema, Tensor, TensorData};
pub use store::{EmbeddingStore, GRAPH_UPDATE_KEY, StoreConfig};
pub use updater::{Accumulate, Overwrite, RowUpdater};
