use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use comms::CommsErr;
use serde::{Deserialize, Serialize};

/// The specific result type for the embedding store.
pub type Result<T> = std::result::Result<T, StoreErr>;

/// The kind of a `StoreErr`, the only part of an error that crosses the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrKind {
    UnknownKey,
    ReservedKey,
    SchemaMismatch,
    NoGraph,
    MalformedDescriptor,
    Comms,
}

/// The errors the embedding store and its service can produce.
#[derive(Debug)]
pub enum StoreErr {
    /// No entry was initialized under this name.
    UnknownKey(String),
    /// The name belongs to the control entry and can't hold rows.
    ReservedKey(String),
    /// A request doesn't fit the entry's schema, nothing was modified.
    SchemaMismatch { name: String, reason: String },
    /// A full graph pass was requested on a store without a graph.
    NoGraph,
    /// A descriptor couldn't be encoded, decoded or applied.
    MalformedDescriptor(String),
    /// The error a remote store answered with.
    Remote { kind: ErrKind, message: String },
    Comms(CommsErr),
}

impl StoreErr {
    pub(crate) fn mismatch<T>(name: &str, reason: impl Into<String>) -> Result<T> {
        Err(Self::SchemaMismatch {
            name: name.to_string(),
            reason: reason.into(),
        })
    }

    /// Returns the kind of this error, remote errors keep the remote kind.
    pub fn kind(&self) -> ErrKind {
        match self {
            Self::UnknownKey(_) => ErrKind::UnknownKey,
            Self::ReservedKey(_) => ErrKind::ReservedKey,
            Self::SchemaMismatch { .. } => ErrKind::SchemaMismatch,
            Self::NoGraph => ErrKind::NoGraph,
            Self::MalformedDescriptor(_) => ErrKind::MalformedDescriptor,
            Self::Remote { kind, .. } => *kind,
            Self::Comms(_) => ErrKind::Comms,
        }
    }
}

impl Display for StoreErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey(name) => write!(f, "unknown key {name:?}"),
            Self::ReservedKey(name) => write!(f, "key {name:?} is reserved"),
            Self::SchemaMismatch { name, reason } => {
                write!(f, "schema mismatch on {name:?}: {reason}")
            }
            Self::NoGraph => f.write_str("the store has no graph to run a full graph update on"),
            Self::MalformedDescriptor(reason) => write!(f, "malformed descriptor: {reason}"),
            Self::Remote { kind, message } => write!(f, "remote store error ({kind:?}): {message}"),
            Self::Comms(e) => write!(f, "comms error: {e}"),
        }
    }
}

impl Error for StoreErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Comms(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CommsErr> for StoreErr {
    fn from(value: CommsErr) -> Self {
        Self::Comms(value)
    }
}

impl From<StoreErr> for io::Error {
    fn from(value: StoreErr) -> Self {
        match value {
            StoreErr::Comms(e) => e.into(),
            e => io::Error::other(e),
        }
    }
}
