use std::{error::Error, fmt, io};

/// The comms module's result type.
pub type Result<T> = std::result::Result<T, CommsErr>;

/// Transport and serialization failures, none of them are retried.
#[derive(Debug)]
pub enum CommsErr {
    /// Setting up a connection failed.
    Io(io::Error),
    /// The stream broke mid conversation, the affected stream is unusable.
    ConnectionLost(io::Error),
    /// A payload's contents are inconsistent with its declared lengths.
    MalformedPayload(String),
    /// A payload doesn't fit the 32 bit length field of a frame, or is over
    /// the receiving end's limit.
    PayloadTooLarge(usize),
}

impl CommsErr {
    pub(crate) fn malformed<T>(reason: impl Into<String>) -> Result<T> {
        Err(Self::MalformedPayload(reason.into()))
    }
}

impl fmt::Display for CommsErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommsErr::Io(e) => write!(f, "io error: {e}"),
            CommsErr::ConnectionLost(e) => write!(f, "connection lost: {e}"),
            CommsErr::MalformedPayload(reason) => write!(f, "malformed payload: {reason}"),
            CommsErr::PayloadTooLarge(len) => write!(f, "payload of {len} bytes is too large"),
        }
    }
}

impl Error for CommsErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommsErr::Io(e) | CommsErr::ConnectionLost(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CommsErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<CommsErr> for io::Error {
    fn from(value: CommsErr) -> Self {
        match value {
            CommsErr::Io(e) | CommsErr::ConnectionLost(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
