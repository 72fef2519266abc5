//! Splitting an outbound payload into packet-sized chunks and re-assembling inbound chunks
//!  into a payload. Re-assembly is strictly arrival-order: chunks are appended as they come
//!  in, with no de-duplication and no reordering window (see the crate docs for why this is
//!  sound under stop-and-wait and where it is not).

/// One slice of an outbound payload; `last` maps to the `LAST` packet kind on the wire.
#[derive(Debug, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub data: &'a [u8],
    pub last: bool,
}

/// One received payload fragment, handed from a dispatcher to the consumer of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundChunk {
    pub data: Vec<u8>,
    pub last: bool,
}

/// Split a payload into chunks of at most `max_chunk_size` bytes, the final one tagged last.
///  An empty payload still produces a single empty last chunk so the receiver sees a
///  terminator.
pub fn split(payload: &[u8], max_chunk_size: usize) -> Vec<Chunk<'_>> {
    if payload.is_empty() {
        return vec![Chunk { data: payload, last: true }];
    }

    let mut chunks: Vec<Chunk> = payload
        .chunks(max_chunk_size)
        .map(|data| Chunk { data, last: false })
        .collect();
    if let Some(chunk) = chunks.last_mut() {
        chunk.last = true;
    }
    chunks
}

/// Accumulates arriving chunks until a last-tagged one completes the payload.
#[derive(Default)]
pub struct Reassembler {
    buf: Vec<u8>,
}

impl Reassembler {
    /// Append one chunk; returns the completed payload when `last` is set.
    pub fn push(&mut self, data: &[u8], last: bool) -> Option<Vec<u8>> {
        self.buf.extend_from_slice(data);
        if last {
            Some(std::mem::take(&mut self.buf))
        }
        else {
            None
        }
    }
}
