//! The request / response protocol of the embedding store service.
//!
//! Every message travels in a single frame whose payload is
//! `json_len: u32 LE | json | body`. The json part describes the message, the
//! body carries its bulk data: row ids as `u64` and row values in the dtype
//! of the entry, both in native byte order.

use comms::{CommsErr, FrameReader, FrameWriter};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    compute::GraphUpdate,
    storage::{Dtype, ErrKind, Schema, StoreErr, Tensor, TensorData, read_unaligned},
};

const JSON_LEN_SIZE: usize = size_of::<u32>();

/// The frame kinds of the store protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Kind {
    Request = 0,
    Response = 1,
}

/// A client's request, row ids and values travel in the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Init { name: String, schema: Schema },
    /// The body holds `ids` row ids.
    Pull { name: String, ids: usize },
    /// The body holds `ids` row ids followed by one row of `cols` values per id.
    Push {
        name: String,
        ids: usize,
        cols: usize,
        dtype: Dtype,
    },
    UpdateAll { update: GraphUpdate },
    Disconnect,
}

/// The server's answer to every request but `Disconnect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok,
    /// The body holds `rows * cols` values.
    Rows { rows: usize, cols: usize, dtype: Dtype },
    Err { kind: ErrKind, message: String },
}

impl From<&StoreErr> for Response {
    fn from(value: &StoreErr) -> Self {
        Self::Err {
            kind: value.kind(),
            message: value.to_string(),
        }
    }
}

/// Sends `msg` followed by the concatenation of `body` in a single frame.
pub(crate) async fn send<W, M>(
    tx: &mut FrameWriter<W>,
    kind: Kind,
    msg: &M,
    body: &[&[u8]],
) -> Result<(), CommsErr>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let json = serde_json::to_vec(msg).map_err(|e| CommsErr::MalformedPayload(e.to_string()))?;
    let json_len = u32::try_from(json.len())
        .map_err(|_| CommsErr::PayloadTooLarge(json.len()))?
        .to_le_bytes();

    let mut parts = Vec::with_capacity(2 + body.len());
    parts.push(&json_len[..]);
    parts.push(&json[..]);
    parts.extend_from_slice(body);

    tx.send_parts(kind as u8, &parts).await
}

/// Waits for the next message of `kind`, its body is left at `buf[offset..]`.
///
/// # Returns
/// The message and its body's offset, or `None` if the peer closed the
/// stream between two frames.
pub(crate) async fn recv<R, M>(
    rx: &mut FrameReader<R>,
    kind: Kind,
    buf: &mut Vec<u8>,
) -> Result<Option<(M, usize)>, CommsErr>
where
    R: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    let Some(header) = rx.recv_into(buf).await? else {
        return Ok(None);
    };

    if header.kind != kind as u8 {
        let reason = format!("expected frame kind {}, got {}", kind as u8, header.kind);
        return Err(CommsErr::MalformedPayload(reason));
    }

    let Some((len, rest)) = buf.split_first_chunk::<JSON_LEN_SIZE>() else {
        return Err(CommsErr::MalformedPayload("missing message length".into()));
    };

    let len = u32::from_le_bytes(*len) as usize;
    if rest.len() < len {
        let reason = format!("message of {len} bytes in a {} bytes payload", rest.len());
        return Err(CommsErr::MalformedPayload(reason));
    }

    let msg = serde_json::from_slice(&rest[..len])
        .map_err(|e| CommsErr::MalformedPayload(e.to_string()))?;

    Ok(Some((msg, JSON_LEN_SIZE + len)))
}

/// Reads `count` row ids from the front of `body`.
///
/// # Returns
/// The ids and the rest of the body.
pub(crate) fn read_ids(body: &[u8], count: usize) -> Result<(Vec<u64>, &[u8]), CommsErr> {
    let size = count
        .checked_mul(size_of::<u64>())
        .filter(|&size| size <= body.len())
        .ok_or_else(|| CommsErr::MalformedPayload(format!("expected {count} row ids")))?;

    let (ids, rest) = body.split_at(size);
    Ok((read_unaligned(ids), rest))
}

/// Reads a `rows * cols` tensor of `dtype` from `body`.
///
/// # Returns
/// `None` if `body` doesn't hold exactly that many values.
pub(crate) fn read_tensor(body: &[u8], rows: usize, cols: usize, dtype: Dtype) -> Option<Tensor> {
    let data = TensorData::from_bytes(dtype, body)?;
    Tensor::new(rows, cols, data)
}
