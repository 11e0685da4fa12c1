use std::io;

use graph::Flow;
use log::{debug, warn};
use tokio::{
    io::AsyncWrite,
    net::{TcpStream, ToSocketAddrs},
    runtime::Handle,
};

use super::Kind;
use crate::{CommsErr, FrameWriter, Result, codec};

/// The producing end of a sampler connection.
///
/// `FINALIZE` is sent exactly once, either through `finalize` or, when the
/// sender is dropped inside a Tokio runtime, from a detached task. A sender
/// whose `send` was cancelled mid frame never writes again, dropping it only
/// closes the stream.
pub struct SamplerSender<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tx: Option<FrameWriter<W>>,
    buf: Vec<u8>,
    sent: usize,
    in_flight: bool,
}

impl SamplerSender<TcpStream> {
    /// Dials a `SamplerReceiver` listening at `addr`.
    ///
    /// # Arguments
    /// * `addr` - The receiver's address.
    /// * `sender_id` - This sender's id, unique among the receiver's senders.
    pub async fn connect<A: ToSocketAddrs>(addr: A, sender_id: u32) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(sender_id = sender_id; "connected to receiver");
        Ok(Self::new(stream, sender_id))
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> SamplerSender<W> {
    /// Creates a new `SamplerSender` over an already established stream.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    /// * `sender_id` - This sender's id.
    pub fn new(tx: W, sender_id: u32) -> Self {
        Self {
            tx: Some(FrameWriter::new(tx, sender_id)),
            buf: Vec::new(),
            sent: 0,
            in_flight: false,
        }
    }

    /// The amount of flows written so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Sends a single flow, returns once the frame is fully written.
    ///
    /// Blocks while the receiver's queue is full.
    pub async fn send(&mut self, flow: &Flow) -> Result<()> {
        self.buf.clear();
        codec::encode(flow, &mut self.buf)?;
        self.write(Kind::Data).await?;
        self.sent += 1;
        Ok(())
    }

    /// Sends every flow in `flows` inside a single frame.
    pub async fn send_batch(&mut self, flows: &[Flow]) -> Result<()> {
        self.buf.clear();
        codec::encode_batch(flows, &mut self.buf)?;
        self.write(Kind::Batch).await?;
        self.sent += flows.len();
        Ok(())
    }

    /// Tells the receiver this sender is done and closes the connection.
    pub async fn finalize(mut self) -> Result<()> {
        if self.in_flight {
            return Err(Self::lost());
        }

        let Some(mut tx) = self.tx.take() else {
            return Err(Self::lost());
        };

        tx.send(Kind::Finalize as u8, &[]).await?;
        tx.shutdown().await?;
        debug!(sender_id = tx.sender_id(), sent = self.sent; "sender finalized");
        Ok(())
    }

    async fn write(&mut self, kind: Kind) -> Result<()> {
        if self.in_flight {
            return Err(Self::lost());
        }

        let Some(tx) = self.tx.as_mut() else {
            return Err(Self::lost());
        };

        self.in_flight = true;
        let res = tx.send(kind as u8, &self.buf).await;
        self.in_flight = false;

        // A broken stream is never written to again.
        if let Err(CommsErr::ConnectionLost(_)) = res {
            self.tx = None;
        }

        res
    }

    fn lost() -> CommsErr {
        let e = io::Error::new(io::ErrorKind::NotConnected, "sender connection is closed");
        CommsErr::ConnectionLost(e)
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> Drop for SamplerSender<W> {
    fn drop(&mut self) {
        let Some(mut tx) = self.tx.take() else {
            return;
        };

        let Ok(handle) = Handle::try_current() else {
            warn!(sender_id = tx.sender_id(); "sender dropped outside a runtime, FINALIZE not sent");
            return;
        };

        // The stream ends inside a half written frame, the receiver sees it as lost.
        let torn = self.in_flight;

        handle.spawn(async move {
            if torn {
                warn!(sender_id = tx.sender_id(); "sender dropped mid frame, FINALIZE not sent");
            } else if let Err(e) = tx.send(Kind::Finalize as u8, &[]).await {
                warn!(sender_id = tx.sender_id(); "failed to finalize dropped sender: {e}");
            }

            let _ = tx.shutdown().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use graph::Block;
    use tokio::{
        io::{self, AsyncReadExt},
        task,
    };

    use super::*;
    use crate::HEADER_SIZE;

    fn flow() -> Flow {
        let block = Block::new(vec![(0, 0)], vec![3]).unwrap();
        Flow::from_parts(vec![vec![1], vec![0]], vec![block]).unwrap()
    }

    /// Starts a send on a stream that can't take the whole frame and abandons it.
    async fn cancel_send<W: AsyncWrite + Unpin + Send + 'static>(sender: &mut SamplerSender<W>) {
        let flow = flow();

        tokio::select! {
            biased;
            _ = sender.send(&flow) => panic!("the stream has no room for the frame"),
            _ = task::yield_now() => {}
        }
    }

    #[tokio::test]
    async fn test_cancelled_send_skips_finalize() {
        let (tx, mut rx) = io::duplex(16);
        let mut sender = SamplerSender::new(tx, 1);

        cancel_send(&mut sender).await;
        drop(sender);

        let mut written = Vec::new();
        rx.read_to_end(&mut written).await.unwrap();

        // Only the start of the abandoned frame, no `FINALIZE` after it.
        assert_eq!(written.len(), 16);
        assert!(written.len() < HEADER_SIZE + codec::encoded_len(&flow()));
    }

    #[tokio::test]
    async fn test_cancelled_send_poisons_sender() {
        let (tx, _rx) = io::duplex(16);
        let mut sender = SamplerSender::new(tx, 2);

        cancel_send(&mut sender).await;

        let err = sender.send(&flow()).await.unwrap_err();
        assert!(matches!(err, CommsErr::ConnectionLost(_)));
        assert!(matches!(sender.finalize().await, Err(CommsErr::ConnectionLost(_))));
    }
}
