use std::io;

use comms::{CommsErr, FrameReader, FrameWriter};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    task::{JoinError, JoinSet},
};

use super::msg::{self, Kind, Request, Response};
use crate::storage::{Overwrite, Result, RowUpdater, StoreErr, StoreHandle, Tensor};

/// The id the server stamps on its frames.
const SERVER_ID: u32 = u32::MAX;

/// Serves one embedding store to many clients, one task per client.
pub struct KvServer<U: RowUpdater = Overwrite> {
    tasks: JoinSet<comms::Result<()>>,
    store: StoreHandle<U>,
}

impl<U: RowUpdater + 'static> KvServer<U> {
    /// Creates a new `KvServer`.
    ///
    /// # Arguments
    /// * `store` - The store to serve.
    pub fn new(store: StoreHandle<U>) -> Self {
        Self {
            tasks: JoinSet::new(),
            store,
        }
    }

    pub fn store(&self) -> &StoreHandle<U> {
        &self.store
    }

    /// Accepts clients from `listener` forever.
    ///
    /// A failure on one client's socket never stops the others.
    pub async fn serve(&mut self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                warn!("failed to set nodelay for {addr}: {e}");
            }
            info!("client connected from {addr}");

            let (rx, tx) = stream.into_split();
            let (rx, tx) = comms::channel(rx, tx, SERVER_ID);
            self.spawn(rx, tx);

            // Reap the clients that already left.
            while let Some(res) = self.tasks.try_join_next() {
                Self::log_exit(res);
            }
        }
    }

    /// Waits for every spawned client to disconnect.
    pub async fn run(&mut self) {
        while let Some(res) = self.tasks.join_next().await {
            Self::log_exit(res);
        }
    }

    fn log_exit(res: std::result::Result<comms::Result<()>, JoinError>) {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("client session ended with an error: {e}"),
            Err(e) => warn!("client task failed: {e}"),
        }
    }

    /// Binds a new client to this server and spawns its session task.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    pub fn spawn<R, W>(&mut self, rx: FrameReader<R>, tx: FrameWriter<W>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let store = self.store.clone();
        self.tasks.spawn(session(store, rx, tx));
    }
}

/// Answers the requests of a single client until it disconnects.
async fn session<U, R, W>(
    store: StoreHandle<U>,
    mut rx: FrameReader<R>,
    mut tx: FrameWriter<W>,
) -> comms::Result<()>
where
    U: RowUpdater,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();

    loop {
        let (req, offset) = match msg::recv::<_, Request>(&mut rx, Kind::Request, &mut buf).await {
            Ok(Some(received)) => received,
            Ok(None) => {
                debug!("client closed the connection");
                return Ok(());
            }
            // The framing is intact, only this request is lost.
            Err(e @ CommsErr::MalformedPayload(_)) => {
                respond(&mut tx, Err(e.into())).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        if matches!(req, Request::Disconnect) {
            debug!("client disconnected");
            return Ok(());
        }

        let res = handle(&store, req, &buf[offset..]).await;
        respond(&mut tx, res).await?;
    }
}

/// Runs a single request against the store.
///
/// # Returns
/// The rows to send back, if the request reads any.
async fn handle<U: RowUpdater>(
    store: &StoreHandle<U>,
    req: Request,
    body: &[u8],
) -> Result<Option<Tensor>> {
    match req {
        Request::Init { name, schema } => store.init(&name, schema).await.map(|_| None),
        Request::Pull { name, ids } => {
            let (ids, _) = msg::read_ids(body, ids)?;
            store.pull(&name, &ids).await.map(Some)
        }
        Request::Push {
            name,
            ids,
            cols,
            dtype,
        } => {
            let (ids, rest) = msg::read_ids(body, ids)?;
            let Some(values) = msg::read_tensor(rest, ids.len(), cols, dtype) else {
                return StoreErr::mismatch(&name, "the value count doesn't match the ids");
            };

            store.push(&name, &ids, &values).await.map(|_| None)
        }
        Request::UpdateAll { update } => store.update_all(update).await.map(|_| None),
        Request::Disconnect => Ok(None),
    }
}

async fn respond<W>(tx: &mut FrameWriter<W>, res: Result<Option<Tensor>>) -> comms::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match res {
        Ok(None) => msg::send(tx, Kind::Response, &Response::Ok, &[]).await,
        Ok(Some(rows)) => {
            let resp = Response::Rows {
                rows: rows.rows(),
                cols: rows.cols(),
                dtype: rows.dtype(),
            };

            msg::send(tx, Kind::Response, &resp, &[rows.data().as_bytes()]).await
        }
        Err(e) => {
            debug!("request failed: {e}");
            msg::send(tx, Kind::Response, &Response::from(&e), &[]).await
        }
    }
}
