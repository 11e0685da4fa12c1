//! Server side full-graph computation driven by serializable descriptors.

mod aggregate;
mod descriptor;

pub use aggregate::{Rows, full_graph, output_cols};
pub use descriptor::{Activation, GraphUpdate, MessageFn, NodeUpdateFn, Param, ReduceFn};
