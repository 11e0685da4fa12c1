use std::{
    collections::VecDeque,
    io,
    net::SocketAddr,
    num::NonZeroUsize,
    sync::Arc,
};

use graph::Flow;
use log::{debug, error, info, warn};
use serde::Deserialize;
use tokio::{
    io::AsyncRead,
    net::{TcpListener, ToSocketAddrs},
    sync::{OwnedSemaphorePermit, Semaphore, mpsc},
    task::{JoinHandle, JoinSet},
};

use super::Kind;
use crate::{CommsErr, FrameReader, Result, codec};

/// The default payload budget of the receiving queue, 200 MiB.
pub const DEFAULT_QUEUE_CAPACITY: usize = 200 * 1024 * 1024;

/// Configuration of a `SamplerReceiver`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReceiverConfig {
    /// The amount of senders to accept, the stream ends once all of them finalized.
    pub expected_senders: NonZeroUsize,
    /// The maximum amount of payload bytes buffered before senders are throttled.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: NonZeroUsize,
}

fn default_queue_capacity() -> NonZeroUsize {
    // SAFETY: The default capacity is a non zero constant.
    NonZeroUsize::new(DEFAULT_QUEUE_CAPACITY).unwrap()
}

impl ReceiverConfig {
    /// Creates a new `ReceiverConfig` with the default queue capacity.
    ///
    /// # Arguments
    /// * `expected_senders` - The amount of senders to accept.
    pub fn new(expected_senders: NonZeroUsize) -> Self {
        Self {
            expected_senders,
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// A frame waiting in the shared queue, holding its share of the byte budget.
struct Queued {
    sender_id: u32,
    kind: Kind,
    payload: Vec<u8>,
    _permit: OwnedSemaphorePermit,
}

/// The consuming end of the sampler transport.
///
/// One background task per sender drains its connection into a queue shared
/// by all senders, bounded by the configured amount of payload bytes. When the
/// queue is full the draining tasks stop reading and the senders block.
pub struct SamplerReceiver {
    queue: mpsc::UnboundedReceiver<Result<Queued>>,
    pending: VecDeque<Flow>,
    acceptor: JoinHandle<()>,
    local_addr: Option<SocketAddr>,
}

impl SamplerReceiver {
    /// Binds `addr` and starts accepting senders.
    ///
    /// # Arguments
    /// * `addr` - The address to listen on.
    /// * `config` - The receiver's configuration.
    pub async fn listen<A: ToSocketAddrs>(addr: A, config: ReceiverConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("sampler receiver listening at {local_addr}");

        let (budget, capacity) = Self::budget(&config);
        let (events, queue) = mpsc::unbounded_channel();
        let expected = config.expected_senders.get();

        let acceptor = tokio::spawn(async move {
            let mut drains = JoinSet::new();

            for _ in 0..expected {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("sender connected from {peer}");
                        let _ = stream.set_nodelay(true);
                        let reader = FrameReader::with_max_payload(stream, capacity);
                        drains.spawn(drain(reader, Arc::clone(&budget), events.clone()));
                    }
                    Err(e) => {
                        error!("failed to accept a sender: {e}");
                        let _ = events.send(Err(CommsErr::Io(e)));
                        break;
                    }
                }
            }

            drop(events);
            join_drains(drains).await;
        });

        Ok(Self {
            queue,
            pending: VecDeque::new(),
            acceptor,
            local_addr: Some(local_addr),
        })
    }

    /// Starts draining already connected streams, one per sender.
    ///
    /// # Arguments
    /// * `streams` - One readable per sender.
    /// * `queue_capacity` - The maximum amount of buffered payload bytes.
    pub fn from_streams<R>(streams: Vec<R>, queue_capacity: NonZeroUsize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let config = ReceiverConfig {
            expected_senders: NonZeroUsize::MIN,
            queue_capacity,
        };

        let (budget, capacity) = Self::budget(&config);
        let (events, queue) = mpsc::unbounded_channel();
        let mut drains = JoinSet::new();

        for stream in streams {
            let reader = FrameReader::with_max_payload(stream, capacity);
            drains.spawn(drain(reader, Arc::clone(&budget), events.clone()));
        }

        drop(events);
        let acceptor = tokio::spawn(join_drains(drains));

        Self {
            queue,
            pending: VecDeque::new(),
            acceptor,
            local_addr: None,
        }
    }

    fn budget(config: &ReceiverConfig) -> (Arc<Semaphore>, u32) {
        let capacity = config.queue_capacity.get().min(u32::MAX as usize) as u32;
        (Arc::new(Semaphore::new(capacity as usize)), capacity)
    }

    /// The address the receiver listens on, if it was created with `listen`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Waits for the next flow.
    ///
    /// # Returns
    /// `None` once every sender finalized and every flow was handed out,
    /// `CommsErr::ConnectionLost` if a sender vanished without finalizing,
    /// `CommsErr::PayloadTooLarge` if a sender's frame is over the queue
    /// capacity, that sender is dropped, and
    /// `CommsErr::MalformedPayload` if a frame can't be decoded, that frame
    /// is discarded.
    pub async fn receive(&mut self) -> Result<Option<Flow>> {
        loop {
            if let Some(flow) = self.pending.pop_front() {
                return Ok(Some(flow));
            }

            let Some(flows) = self.next_frame().await? else {
                return Ok(None);
            };

            self.pending.extend(flows);
        }
    }

    /// Waits for the next frame's worth of flows.
    ///
    /// A `DATA` frame yields a single flow and a `BATCH` frame all of its
    /// flows. Flows left over by `receive` are returned first.
    pub async fn receive_batch(&mut self) -> Result<Option<Vec<Flow>>> {
        if !self.pending.is_empty() {
            return Ok(Some(self.pending.drain(..).collect()));
        }

        loop {
            match self.next_frame().await? {
                Some(flows) if flows.is_empty() => continue,
                res => return Ok(res),
            }
        }
    }

    async fn next_frame(&mut self) -> Result<Option<Vec<Flow>>> {
        let Some(queued) = self.queue.recv().await else {
            debug!("every sender finalized");
            return Ok(None);
        };

        let Queued {
            sender_id,
            kind,
            payload,
            ..
        } = queued?;

        let decoded = match kind {
            Kind::Data => codec::decode(&payload).map(|flow| vec![flow]),
            Kind::Batch => codec::decode_batch(&payload),
            Kind::Finalize => unreachable!("finalize frames are never queued"),
        };

        if let Err(e) = &decoded {
            error!(sender_id = sender_id; "discarding frame: {e}");
        }

        decoded.map(Some)
    }

    /// Tears down every connection immediately, queued flows are lost.
    pub fn close(self) {}
}

impl Drop for SamplerReceiver {
    fn drop(&mut self) {
        // Aborting the acceptor drops its `JoinSet`, aborting every drain task.
        self.acceptor.abort();
    }
}

async fn join_drains(mut drains: JoinSet<()>) {
    while let Some(res) = drains.join_next().await {
        if let Err(e) = res {
            warn!("drain task failed: {e}");
        }
    }
}

/// Moves the frames of a single sender into the shared queue until it finalizes.
async fn drain<R>(
    mut reader: FrameReader<R>,
    budget: Arc<Semaphore>,
    events: mpsc::UnboundedSender<Result<Queued>>,
) where
    R: AsyncRead + Unpin,
{
    let mut frames = 0usize;

    loop {
        let header = match reader.recv_header().await {
            Ok(Some(header)) => header,
            Ok(None) => {
                let e = io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "sender closed the connection without finalizing",
                );
                let _ = events.send(Err(CommsErr::ConnectionLost(e)));
                return;
            }
            Err(e) => {
                let _ = events.send(Err(e));
                return;
            }
        };

        let sender_id = header.sender_id;

        let kind = match Kind::try_from(header.kind) {
            Ok(Kind::Finalize) => {
                info!(sender_id = sender_id, frames = frames; "sender finalized");
                return;
            }
            Ok(kind) => kind,
            Err(byte) => {
                let e = CommsErr::MalformedPayload(format!("unknown frame kind {byte}"));
                let _ = events.send(Err(e));
                return;
            }
        };

        // The reader refuses frames over the whole budget.
        let Ok(permit) = Arc::clone(&budget).acquire_many_owned(header.len).await
        else {
            return;
        };

        let mut payload = Vec::new();
        if let Err(e) = reader.recv_payload(&header, &mut payload).await {
            let _ = events.send(Err(e));
            return;
        }

        frames += 1;
        let queued = Queued {
            sender_id,
            kind,
            payload,
            _permit: permit,
        };

        if events.send(Ok(queued)).is_err() {
            // The receiver is gone.
            return;
        }
    }
}
