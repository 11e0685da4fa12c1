use std::io;

use comms::{CommsErr, FrameReader, FrameWriter};
use log::debug;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use super::msg::{self, Kind, Request, Response};
use crate::{
    compute::GraphUpdate,
    storage::{Result, Schema, StoreErr, Tensor},
};

/// The remote mirror of an `EmbeddingStore`, talking to a `KvServer`.
///
/// Requests are answered in order, one at a time.
pub struct KvClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rx: FrameReader<R>,
    tx: FrameWriter<W>,
    buf: Vec<u8>,
}

impl KvClient<OwnedReadHalf, OwnedWriteHalf> {
    /// Connects to the `KvServer` at `addr`.
    ///
    /// # Arguments
    /// * `addr` - The server's address.
    /// * `client_id` - The id stamped on this client's frames.
    pub async fn connect<A: ToSocketAddrs>(addr: A, client_id: u32) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(CommsErr::from)?;
        stream.set_nodelay(true).map_err(CommsErr::from)?;

        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx, client_id);
        Ok(Self::new(rx, tx))
    }
}

impl<R, W> KvClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new `KvClient` over an established channel.
    pub fn new(rx: FrameReader<R>, tx: FrameWriter<W>) -> Self {
        Self {
            rx,
            tx,
            buf: Vec::new(),
        }
    }

    /// Remote `EmbeddingStore::init`.
    pub async fn init(&mut self, name: &str, schema: Schema) -> Result<()> {
        let req = Request::Init {
            name: name.to_string(),
            schema,
        };

        self.call(&req, &[]).await.and_then(Self::expect_ok)
    }

    /// Remote `EmbeddingStore::pull`.
    pub async fn pull(&mut self, name: &str, ids: &[u64]) -> Result<Tensor> {
        let req = Request::Pull {
            name: name.to_string(),
            ids: ids.len(),
        };

        let (resp, offset) = self.call(&req, &[bytemuck::cast_slice::<u64, u8>(ids)]).await?;

        let Response::Rows { rows, cols, dtype } = resp else {
            return Err(unexpected(&resp));
        };

        msg::read_tensor(&self.buf[offset..], rows, cols, dtype).ok_or_else(|| {
            let reason = format!("expected {rows} rows of {cols} {dtype:?} values");
            StoreErr::Comms(CommsErr::MalformedPayload(reason))
        })
    }

    /// Remote `EmbeddingStore::push`, `values` holds one row per id.
    pub async fn push(&mut self, name: &str, ids: &[u64], values: &Tensor) -> Result<()> {
        let req = Request::Push {
            name: name.to_string(),
            ids: ids.len(),
            cols: values.cols(),
            dtype: values.dtype(),
        };

        let body = [bytemuck::cast_slice::<u64, u8>(ids), values.data().as_bytes()];
        self.call(&req, &body).await.and_then(Self::expect_ok)
    }

    /// Remote `EmbeddingStore::update_all`.
    ///
    /// Inline parameters are pushed as ordinary entries first, so only the
    /// detached descriptor crosses the control channel.
    pub async fn update_all(&mut self, mut update: GraphUpdate) -> Result<()> {
        for (name, value) in update.detach() {
            let ids: Vec<u64> = (0..value.rows() as u64).collect();
            self.init(&name, value.schema()).await?;
            self.push(&name, &ids, &value).await?;
            debug!(name = name.as_str(); "parameter pushed");
        }

        let req = Request::UpdateAll { update };
        self.call(&req, &[]).await.and_then(Self::expect_ok)
    }

    /// Tells the server this client is done and closes the connection.
    pub async fn disconnect(mut self) -> Result<()> {
        msg::send(&mut self.tx, Kind::Request, &Request::Disconnect, &[]).await?;
        self.tx.shutdown().await?;
        Ok(())
    }

    async fn call(&mut self, req: &Request, body: &[&[u8]]) -> Result<(Response, usize)> {
        msg::send(&mut self.tx, Kind::Request, req, body).await?;

        let Some((resp, offset)) = msg::recv::<_, Response>(&mut self.rx, Kind::Response, &mut self.buf).await?
        else {
            let e = io::Error::new(io::ErrorKind::UnexpectedEof, "server closed the connection");
            return Err(CommsErr::ConnectionLost(e).into());
        };

        match resp {
            Response::Err { kind, message } => Err(StoreErr::Remote { kind, message }),
            resp => Ok((resp, offset)),
        }
    }

    fn expect_ok((resp, _): (Response, usize)) -> Result<()> {
        match resp {
            Response::Ok => Ok(()),
            resp => Err(unexpected(&resp)),
        }
    }
}

fn unexpected(resp: &Response) -> StoreErr {
    StoreErr::Comms(CommsErr::MalformedPayload(format!("unexpected response {resp:?}")))
}
