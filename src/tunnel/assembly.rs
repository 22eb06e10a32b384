//! Reassembly of chunked response bodies.
//!
//! Chunks are keyed by index, so arrival order does not matter. A repeated
//! index overwrites the earlier bytes (last write wins); the caller is told
//! so it can log the replacement.

use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;

use crate::tunnel::message::{BodyChunk, ResponseDescriptor};

/// Per-request chunk assembly state.
#[derive(Debug, Default)]
pub struct ChunkAssembly {
    chunks: BTreeMap<usize, Bytes>,
    terminal: Option<(ResponseDescriptor, usize)>,
}

impl ChunkAssembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a chunk. Returns the bytes it replaced, if the index was
    /// already present.
    pub fn record_chunk(&mut self, chunk: &BodyChunk) -> Option<Bytes> {
        self.chunks.insert(chunk.index, chunk.bytes.clone())
    }

    /// Record the end-of-body descriptor and declared chunk count.
    pub fn record_terminal(&mut self, descriptor: ResponseDescriptor, total_chunks: usize) {
        self.terminal = Some((descriptor, total_chunks));
    }

    pub fn end_marker_seen(&self) -> bool {
        self.terminal.is_some()
    }

    /// Declared chunk count, once the end marker has arrived.
    pub fn total_chunks(&self) -> Option<usize> {
        self.terminal.as_ref().map(|(_, total)| *total)
    }

    /// Distinct indices recorded so far.
    pub fn received(&self) -> usize {
        self.chunks.len()
    }

    /// Every index in `0..total_chunks` is present.
    pub fn chunks_complete(&self) -> bool {
        match self.total_chunks() {
            Some(total) => self.chunks.len() == total && (0..total).all(|i| self.chunks.contains_key(&i)),
            None => false,
        }
    }

    /// End marker seen and all chunks present, in whichever order they came.
    pub fn is_complete(&self) -> bool {
        self.end_marker_seen() && self.chunks_complete()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.terminal.is_none()
    }

    /// Consume a complete assembly into its descriptor and the body
    /// concatenated in ascending index order.
    pub fn finish(self) -> Option<(ResponseDescriptor, Bytes)> {
        let (descriptor, _) = self.terminal?;
        let mut body = BytesMut::with_capacity(self.chunks.values().map(Bytes::len).sum());
        for bytes in self.chunks.into_values() {
            body.extend_from_slice(&bytes);
        }
        Some((descriptor, body.freeze()))
    }
}
