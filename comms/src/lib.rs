pub mod codec;
mod error;
mod frame;
pub mod sampler;

use tokio::io::{AsyncRead, AsyncWrite};

pub use error::{CommsErr, Result};
pub use frame::{FrameReader, FrameWriter, HEADER_SIZE, Header};
pub use sampler::{ReceiverConfig, SamplerReceiver, SamplerSender};

/// Creates both `FrameReader` and `FrameWriter` network channel parts.
///
/// Given a reader and writer creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
/// * `sender_id` - The id stamped on every frame written through `tx`.
///
/// # Returns
/// A communication stream in the form of a frame reader and writer.
pub fn channel<R, W>(rx: R, tx: W, sender_id: u32) -> (FrameReader<R>, FrameWriter<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReader::new(rx), FrameWriter::new(tx, sender_id))
}
