use std::{error::Error, fmt, io};

use crate::NodeId;

/// The graph module's result type.
pub type Result<T> = std::result::Result<T, GraphErr>;

/// Failures while building a `Graph` or assembling a `Flow` from raw parts.
#[derive(Debug)]
pub enum GraphErr {
    Io(io::Error),
    NodeOutOfRange { node: NodeId, num_nodes: usize },
    Parse { line: usize, reason: String },
    InvalidFlow(String),
}

impl fmt::Display for GraphErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphErr::Io(e) => write!(f, "io error: {e}"),
            GraphErr::NodeOutOfRange { node, num_nodes } => {
                write!(f, "node {node} is out of range for a graph of {num_nodes} nodes")
            }
            GraphErr::Parse { line, reason } => write!(f, "edge list line {line}: {reason}"),
            GraphErr::InvalidFlow(reason) => write!(f, "invalid flow: {reason}"),
        }
    }
}

impl Error for GraphErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GraphErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for GraphErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
