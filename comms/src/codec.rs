//! The offset table encoding of a `Flow`.
//!
//! Every integer is little endian and fixed width:
//!
//! ```text
//! u32                       num_layers (K + 1)
//! u32[K + 2]                layer_offsets into parent_node_ids
//! u32[K + 1]                block_offsets into parent_edge_ids
//! u64[layer_offsets[K + 1]] parent_node_ids
//! u64[block_offsets[K]]     parent_edge_ids
//! u32[block_offsets[K]]     edge_src_local
//! u32[block_offsets[K]]     edge_dst_local
//! ```
//!
//! A batch is `u32 count` followed by `count` times `u32 len` and a flow encoding.

use graph::{Block, EdgeId, Flow, NodeId};

use crate::{CommsErr, Result};

const U32: usize = size_of::<u32>();
const U64: usize = size_of::<u64>();

/// The exact amount of bytes `encode` appends for `flow`.
pub fn encoded_len(flow: &Flow) -> usize {
    let (layers, nodes, edges) = (flow.num_layers(), flow.num_nodes(), flow.num_edges());
    U32 + (layers + 1) * U32 + layers * U32 + nodes * U64 + edges * (U64 + 2 * U32)
}

/// Appends the encoding of `flow` to `buf`.
///
/// # Returns
/// `CommsErr::PayloadTooLarge` if the flow has more nodes or edges than fit an offset.
pub fn encode(flow: &Flow, buf: &mut Vec<u8>) -> Result<()> {
    let len = encoded_len(flow);

    if u32::try_from(len).is_err() {
        return Err(CommsErr::PayloadTooLarge(len));
    }

    buf.reserve(len);
    put_u32(buf, flow.num_layers() as u32);

    let mut offset = 0;
    put_u32(buf, offset);
    for layer in flow.layers() {
        offset += layer.len() as u32;
        put_u32(buf, offset);
    }

    let mut offset = 0;
    put_u32(buf, offset);
    for block in flow.blocks() {
        offset += block.len() as u32;
        put_u32(buf, offset);
    }

    for layer in flow.layers() {
        layer.parent_nodes().iter().for_each(|&n| put_u64(buf, n));
    }

    for block in flow.blocks() {
        block.parent_edges().iter().for_each(|&e| put_u64(buf, e));
    }

    for block in flow.blocks() {
        block.edges().iter().for_each(|&(src, _)| put_u32(buf, src));
    }

    for block in flow.blocks() {
        block.edges().iter().for_each(|&(_, dst)| put_u32(buf, dst));
    }

    Ok(())
}

/// Decodes a single flow, `bytes` must hold exactly one encoding.
///
/// # Returns
/// The decoded flow or `CommsErr::MalformedPayload` if any offset or local id
/// is inconsistent with the data.
pub fn decode(bytes: &[u8]) -> Result<Flow> {
    let mut cursor = Cursor::new(bytes);
    let flow = decode_from(&mut cursor)?;
    cursor.finish()?;
    Ok(flow)
}

/// Appends a batch holding every flow in `flows` to `buf`.
pub fn encode_batch(flows: &[Flow], buf: &mut Vec<u8>) -> Result<()> {
    let count = u32::try_from(flows.len()).map_err(|_| CommsErr::PayloadTooLarge(flows.len()))?;
    put_u32(buf, count);

    for flow in flows {
        let len = encoded_len(flow);
        put_u32(buf, len as u32);
        encode(flow, buf)?;
    }

    Ok(())
}

/// Decodes a batch written by `encode_batch`.
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<Flow>> {
    let mut cursor = Cursor::new(bytes);
    let count = cursor.u32()? as usize;

    // Every entry takes at least its own length prefix.
    if count > cursor.remaining() / U32 {
        return CommsErr::malformed(format!("batch announces {count} flows"));
    }

    let mut flows = Vec::with_capacity(count);
    for i in 0..count {
        let len = cursor.u32()? as usize;
        let flow = decode(cursor.take(len).map_err(|_| {
            CommsErr::MalformedPayload(format!("batch entry {i} announces {len} bytes"))
        })?)?;

        flows.push(flow);
    }

    cursor.finish()?;
    Ok(flows)
}

fn decode_from(cursor: &mut Cursor<'_>) -> Result<Flow> {
    let num_layers = cursor.u32()? as usize;

    if num_layers == 0 {
        return CommsErr::malformed("a flow has at least one layer");
    }

    let layer_offsets = cursor.u32s(num_layers + 1)?;
    let block_offsets = cursor.u32s(num_layers)?;
    check_offsets("layer", &layer_offsets)?;
    check_offsets("block", &block_offsets)?;

    let num_nodes = layer_offsets[num_layers] as usize;
    let num_edges = block_offsets[num_layers - 1] as usize;

    let nodes: Vec<NodeId> = cursor.u64s(num_nodes)?;
    let edges: Vec<EdgeId> = cursor.u64s(num_edges)?;
    let srcs = cursor.u32s(num_edges)?;
    let dsts = cursor.u32s(num_edges)?;

    let layers = layer_offsets
        .windows(2)
        .map(|w| nodes[w[0] as usize..w[1] as usize].to_vec())
        .collect();

    let blocks = block_offsets
        .windows(2)
        .map(|w| {
            let range = w[0] as usize..w[1] as usize;
            let local = srcs[range.clone()]
                .iter()
                .copied()
                .zip(dsts[range.clone()].iter().copied())
                .collect();

            Block::new(local, edges[range].to_vec())
        })
        .collect::<graph::Result<Vec<_>>>()
        .map_err(|e| CommsErr::MalformedPayload(e.to_string()))?;

    Flow::from_parts(layers, blocks).map_err(|e| CommsErr::MalformedPayload(e.to_string()))
}

fn check_offsets(what: &str, offsets: &[u32]) -> Result<()> {
    if offsets.first() != Some(&0) {
        return CommsErr::malformed(format!("{what} offsets don't start at 0"));
    }

    if offsets.windows(2).any(|w| w[0] > w[1]) {
        return CommsErr::malformed(format!("{what} offsets decrease"));
    }

    Ok(())
}

fn put_u32(buf: &mut Vec<u8>, n: u32) {
    buf.extend_from_slice(&n.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, n: u64) {
    buf.extend_from_slice(&n.to_le_bytes());
}

/// A bounds checked reader over an encoded payload.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return CommsErr::malformed(format!(
                "needed {n} bytes at offset {}, only {} left",
                self.pos,
                self.remaining()
            ));
        }

        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(U32)?;
        // SAFETY: `take` returned exactly `U32` bytes.
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn u32s(&mut self, n: usize) -> Result<Vec<u32>> {
        let len = n.checked_mul(U32).unwrap_or(usize::MAX);
        let bytes = self.take(len)?;

        // SAFETY: `chunks_exact` only yields `U32` byte chunks.
        Ok(bytes
            .chunks_exact(U32)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect())
    }

    fn u64s(&mut self, n: usize) -> Result<Vec<u64>> {
        let len = n.checked_mul(U64).unwrap_or(usize::MAX);
        let bytes = self.take(len)?;

        // SAFETY: `chunks_exact` only yields `U64` byte chunks.
        Ok(bytes
            .chunks_exact(U64)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect())
    }

    fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => CommsErr::malformed(format!("{n} trailing bytes")),
        }
    }
}

#[cfg(test)]
mod tests {
    use graph::{
        Direction, Graph,
        sampling::{SampleOpts, sample_flow},
    };
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn sampled(seeds: &[NodeId], num_hops: usize) -> Flow {
        let edges = (0..40).flat_map(|i| [(i, (i * 7 + 1) % 40), (i, (i * 3 + 2) % 40)]).collect();
        let g = Graph::new(40, edges).unwrap();
        let opts = SampleOpts {
            num_hops,
            fanout: 2,
            direction: Direction::In,
            replace: false,
        };

        sample_flow(&g, seeds, &opts, &mut StdRng::seed_from_u64(8)).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        for (seeds, hops) in [(&[1, 2, 3][..], 2), (&[5][..], 0), (&[0, 39][..], 4)] {
            let flow = sampled(seeds, hops);
            let mut buf = Vec::new();
            encode(&flow, &mut buf).unwrap();

            assert_eq!(buf.len(), encoded_len(&flow));
            assert_eq!(decode(&buf).unwrap(), flow);
        }
    }

    #[test]
    fn test_roundtrip_with_empty_layers() {
        let block = Block::new(vec![], vec![]).unwrap();
        let flow = Flow::from_parts(vec![vec![], vec![9]], vec![block]).unwrap();

        let mut buf = Vec::new();
        encode(&flow, &mut buf).unwrap();
        assert_eq!(decode(&buf).unwrap(), flow);
    }

    #[test]
    fn test_layout_of_single_edge_flow() {
        let block = Block::new(vec![(0, 0)], vec![6]).unwrap();
        let flow = Flow::from_parts(vec![vec![4], vec![5]], vec![block]).unwrap();

        let mut buf = Vec::new();
        encode(&flow, &mut buf).unwrap();

        let words: Vec<u32> = buf[..7 * U32]
            .chunks_exact(U32)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();

        // num_layers, layer_offsets, block_offsets
        assert_eq!(words, [2, 0, 1, 2, 0, 1, 4]);
        assert_eq!(buf.len(), 4 + 3 * 4 + 2 * 4 + 2 * 8 + 8 + 4 + 4);
    }

    #[test]
    fn test_batch_roundtrip() {
        let flows = vec![sampled(&[1], 1), sampled(&[2, 3], 2), sampled(&[4], 0)];
        let mut buf = Vec::new();
        encode_batch(&flows, &mut buf).unwrap();

        assert_eq!(decode_batch(&buf).unwrap(), flows);

        buf.clear();
        encode_batch(&[], &mut buf).unwrap();
        assert!(decode_batch(&buf).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_payload() {
        let mut buf = Vec::new();
        encode(&sampled(&[1, 2], 2), &mut buf).unwrap();
        buf.pop();

        assert!(matches!(decode(&buf), Err(CommsErr::MalformedPayload(_))));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut buf = Vec::new();
        encode(&sampled(&[1], 1), &mut buf).unwrap();
        buf.push(0);

        assert!(matches!(decode(&buf), Err(CommsErr::MalformedPayload(_))));
    }

    #[test]
    fn test_offsets_must_start_at_zero() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 1);
        [0, 3].iter().for_each(|&o| put_u32(&mut buf, o));
        put_u32(&mut buf, 0);
        buf.extend_from_slice(&[0; 3 * U64]);

        assert!(decode(&buf).is_ok());

        buf[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(decode(&buf), Err(CommsErr::MalformedPayload(_))));
    }

    #[test]
    fn test_local_id_out_of_range() {
        let block = Block::new(vec![(0, 0)], vec![6]).unwrap();
        let flow = Flow::from_parts(vec![vec![4], vec![5]], vec![block]).unwrap();

        let mut buf = Vec::new();
        encode(&flow, &mut buf).unwrap();
        let dst_at = buf.len() - U32;
        buf[dst_at..].copy_from_slice(&1u32.to_le_bytes());

        assert!(matches!(decode(&buf), Err(CommsErr::MalformedPayload(_))));
    }

    #[test]
    fn test_huge_counts_fail_without_allocating() {
        let mut buf = Vec::new();
        put_u32(&mut buf, u32::MAX);
        assert!(matches!(decode(&buf), Err(CommsErr::MalformedPayload(_))));

        let mut buf = Vec::new();
        put_u32(&mut buf, u32::MAX);
        assert!(matches!(decode_batch(&buf), Err(CommsErr::MalformedPayload(_))));
    }
}
