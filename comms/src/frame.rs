//! The framing shared by every conversation in the system.
//!
//! A frame is `sender_id: u32 | kind: u8 | len: u32 | payload`, integers in
//! big endian. The meaning of `kind` belongs to the protocol running on top.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{CommsErr, Result};

pub const HEADER_SIZE: usize = size_of::<u32>() + size_of::<u8>() + size_of::<u32>();

/// The fixed size prefix of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub sender_id: u32,
    pub kind: u8,
    pub len: u32,
}

impl Header {
    fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut buf = [0; HEADER_SIZE];
        buf[..4].copy_from_slice(&self.sender_id.to_be_bytes());
        buf[4] = self.kind;
        buf[5..].copy_from_slice(&self.len.to_be_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        let [a, b, c, d, kind, e, f, g, h] = *buf;

        Self {
            sender_id: u32::from_be_bytes([a, b, c, d]),
            kind,
            len: u32::from_be_bytes([e, f, g, h]),
        }
    }
}

/// The sending end handle of the communication.
pub struct FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    sender_id: u32,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Creates a new `FrameWriter` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    /// * `sender_id` - The id stamped on every frame.
    pub fn new(tx: W, sender_id: u32) -> Self {
        Self { tx, sender_id }
    }

    pub fn sender_id(&self) -> u32 {
        self.sender_id
    }

    /// Sends a frame made of `kind` and `payload`.
    ///
    /// # Arguments
    /// * `kind` - The protocol specific frame kind.
    /// * `payload` - The frame's body.
    ///
    /// # Returns
    /// `CommsErr::PayloadTooLarge` if `payload` doesn't fit a frame or
    /// `CommsErr::ConnectionLost` if the stream fails.
    pub async fn send(&mut self, kind: u8, payload: &[u8]) -> Result<()> {
        self.send_parts(kind, &[payload]).await
    }

    /// Sends a single frame whose payload is the concatenation of `parts`.
    ///
    /// Lets callers prepend a small serialized header to a large borrowed body
    /// without copying the body.
    pub async fn send_parts(&mut self, kind: u8, parts: &[&[u8]]) -> Result<()> {
        let len: usize = parts.iter().map(|p| p.len()).sum();
        let len = u32::try_from(len).map_err(|_| CommsErr::PayloadTooLarge(len))?;

        let header = Header {
            sender_id: self.sender_id,
            kind,
            len,
        };

        self.write(&header.to_bytes(), parts)
            .await
            .map_err(CommsErr::ConnectionLost)
    }

    async fn write(&mut self, header: &[u8], parts: &[&[u8]]) -> io::Result<()> {
        self.tx.write_all(header).await?;

        for part in parts.iter().filter(|p| !p.is_empty()) {
            self.tx.write_all(part).await?;
        }

        self.tx.flush().await
    }

    /// Flushes and closes the writing half of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.tx.shutdown().await.map_err(CommsErr::ConnectionLost)
    }
}

/// The receiving end handle of the communication.
pub struct FrameReader<R: AsyncRead + Unpin> {
    rx: R,
    max_payload: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Creates a new `FrameReader` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub fn new(rx: R) -> Self {
        Self::with_max_payload(rx, u32::MAX)
    }

    /// Creates a new `FrameReader` refusing payloads over `max_payload` bytes.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    /// * `max_payload` - The largest payload accepted, checked before any allocation.
    pub fn with_max_payload(rx: R, max_payload: u32) -> Self {
        Self { rx, max_payload }
    }

    /// Waits for the next frame header.
    ///
    /// # Returns
    /// `None` if the peer closed the stream cleanly between two frames,
    /// `CommsErr::ConnectionLost` if it broke in the middle of one and
    /// `CommsErr::PayloadTooLarge` if the announced payload is over the limit.
    /// The stream can't be resynchronized after the latter.
    pub async fn recv_header(&mut self) -> Result<Option<Header>> {
        let mut buf = [0; HEADER_SIZE];
        let mut filled = 0;

        while filled < HEADER_SIZE {
            let n = self
                .rx
                .read(&mut buf[filled..])
                .await
                .map_err(CommsErr::ConnectionLost)?;

            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }

                let e = io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed mid header");
                return Err(CommsErr::ConnectionLost(e));
            }

            filled += n;
        }

        let header = Header::from_bytes(&buf);
        if header.len > self.max_payload {
            return Err(CommsErr::PayloadTooLarge(header.len as usize));
        }

        Ok(Some(header))
    }

    /// Reads the payload announced by `header` into `buf`, replacing its contents.
    pub async fn recv_payload(&mut self, header: &Header, buf: &mut Vec<u8>) -> Result<()> {
        buf.clear();
        buf.resize(header.len as usize, 0);

        self.rx
            .read_exact(buf)
            .await
            .map_err(CommsErr::ConnectionLost)?;

        Ok(())
    }

    /// Waits for a whole frame, its payload is left in `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer to read the payload into.
    ///
    /// # Returns
    /// The frame's header, or `None` if the peer closed the stream cleanly.
    pub async fn recv_into(&mut self, buf: &mut Vec<u8>) -> Result<Option<Header>> {
        let Some(header) = self.recv_header().await? else {
            return Ok(None);
        };

        self.recv_payload(&header, buf).await?;
        Ok(Some(header))
    }
}
