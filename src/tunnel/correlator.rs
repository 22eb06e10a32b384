//! Per-request response correlation.
//!
//! # Responsibilities
//! - Match inbound frames to one request id
//! - Feed chunks and the end-of-body marker into the chunk assembly
//! - Decide when a response is final and how its body is delivered
//!
//! # Design Decisions
//! - Pure state machine; timers and listeners live in [`RequestContext`]
//!   so this type can be driven synchronously in tests
//! - A blob key on the terminal descriptor wins over any chunk data
//!
//! [`RequestContext`]: crate::tunnel::RequestContext

use axum::http::StatusCode;
use bytes::Bytes;
use subtle::ConstantTimeEq;

use crate::observability::metrics;
use crate::tunnel::assembly::ChunkAssembly;
use crate::tunnel::message::{InboundMessage, ResponseBody, ResponseDescriptor, ResponseFrame, WireHeaders};

/// Compare a candidate request id against the awaited one.
///
/// Ids of different length are rejected before any content is compared.
/// Equal-length ids are compared in constant time.
pub fn request_id_matches(candidate: &str, awaited: &str) -> bool {
    let (a, b) = (candidate.as_bytes(), awaited.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Lifecycle of one awaited response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationState {
    Waiting,
    Partial,
    Resolved,
    TimedOut,
}

impl CorrelationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CorrelationState::Resolved | CorrelationState::TimedOut)
    }
}

/// A finalized response, by delivery mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Self-contained frame with an inline body.
    Inline {
        status: StatusCode,
        headers: WireHeaders,
        body: Bytes,
    },
    /// Body reassembled from chunk frames.
    Assembled {
        status: StatusCode,
        headers: WireHeaders,
        body: Bytes,
        chunks: usize,
    },
    /// Body offloaded to the blob store.
    Blob {
        status: StatusCode,
        headers: WireHeaders,
        key: String,
    },
}

impl Completion {
    /// Label for logs and metrics.
    pub fn mode(&self) -> &'static str {
        match self {
            Completion::Inline { .. } => "inline",
            Completion::Assembled { .. } => "chunked",
            Completion::Blob { .. } => "blob",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Completion::Inline { status, .. }
            | Completion::Assembled { status, .. }
            | Completion::Blob { status, .. } => *status,
        }
    }

    fn from_single(descriptor: &ResponseDescriptor) -> Self {
        let ResponseDescriptor { status, headers, body } = descriptor.clone();
        match body {
            ResponseBody::Blob(key) => Completion::Blob { status, headers, key },
            ResponseBody::Inline(body) => Completion::Inline { status, headers, body },
            ResponseBody::Chunked => Completion::Inline {
                status,
                headers,
                body: Bytes::new(),
            },
        }
    }

    fn from_assembled(descriptor: ResponseDescriptor, body: Bytes, chunks: usize) -> Self {
        let ResponseDescriptor { status, headers, body: representation } = descriptor;
        match representation {
            ResponseBody::Blob(key) => Completion::Blob { status, headers, key },
            _ => Completion::Assembled {
                status,
                headers,
                body,
                chunks,
            },
        }
    }
}

/// Response correlation for one request id.
#[derive(Debug)]
pub struct ResponseCorrelator {
    req_id: String,
    state: CorrelationState,
    assembly: ChunkAssembly,
}

impl ResponseCorrelator {
    pub fn new(req_id: impl Into<String>) -> Self {
        Self {
            req_id: req_id.into(),
            state: CorrelationState::Waiting,
            assembly: ChunkAssembly::new(),
        }
    }

    pub fn req_id(&self) -> &str {
        &self.req_id
    }

    pub fn state(&self) -> CorrelationState {
        self.state
    }

    /// Apply one inbound message. Returns the completion when this message
    /// finalizes the response; every later call is a no-op.
    pub fn observe(&mut self, message: &InboundMessage) -> Option<Completion> {
        if self.state.is_terminal() {
            return None;
        }
        let frame = match message {
            InboundMessage::ClientDisconnect => return None,
            InboundMessage::Response(frame) => frame,
        };
        match frame.req_id.as_deref() {
            Some(candidate) if request_id_matches(candidate, &self.req_id) => {}
            _ => return None,
        }

        let completion = if frame.is_self_contained() {
            match &frame.descriptor {
                Some(descriptor) => Some(Completion::from_single(descriptor)),
                None => {
                    tracing::warn!(request_id = %self.req_id, "Response frame without res; ignoring");
                    None
                }
            }
        } else {
            self.record(frame);
            self.try_finish()
        };

        match completion {
            Some(completion) => {
                self.state = CorrelationState::Resolved;
                Some(completion)
            }
            None => {
                if !self.assembly.is_empty() {
                    self.state = CorrelationState::Partial;
                }
                None
            }
        }
    }

    /// Move to `TimedOut` unless already terminal. Returns whether it did.
    pub fn time_out(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = CorrelationState::TimedOut;
        true
    }

    fn record(&mut self, frame: &ResponseFrame) {
        if let Some(chunk) = &frame.chunk {
            metrics::record_chunks("inbound", 1);
            if self.assembly.record_chunk(chunk).is_some() {
                metrics::record_duplicate_chunk();
                tracing::warn!(
                    request_id = %self.req_id,
                    chunk_index = chunk.index,
                    "Duplicate chunk index; keeping the latest bytes"
                );
            } else {
                tracing::trace!(request_id = %self.req_id, chunk_index = chunk.index, "Chunk recorded");
            }
        }

        if frame.end_body_chunk {
            match (&frame.descriptor, frame.total_chunks) {
                (Some(descriptor), Some(total)) => {
                    tracing::debug!(request_id = %self.req_id, total_chunks = total, "End-of-body marker received");
                    self.assembly.record_terminal(descriptor.clone(), total);
                }
                _ => tracing::warn!(
                    request_id = %self.req_id,
                    "End-of-body marker without res or totalChunks; ignoring"
                ),
            }
        }
    }

    fn try_finish(&mut self) -> Option<Completion> {
        if !self.assembly.is_complete() {
            return None;
        }
        let chunks = self.assembly.received();
        let (descriptor, body) = std::mem::take(&mut self.assembly).finish()?;
        Some(Completion::from_assembled(descriptor, body, chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::message::{BodyChunk, HeaderValues};

    fn inline(req_id: &str, status: u16, body: &'static [u8]) -> InboundMessage {
        InboundMessage::Response(ResponseFrame {
            req_id: Some(req_id.into()),
            descriptor: Some(ResponseDescriptor {
                status: StatusCode::from_u16(status).unwrap(),
                headers: WireHeaders::new(),
                body: ResponseBody::Inline(Bytes::from_static(body)),
            }),
            chunk: None,
            end_body_chunk: false,
            total_chunks: None,
        })
    }

    fn chunk(req_id: &str, index: usize, bytes: &'static [u8]) -> InboundMessage {
        InboundMessage::Response(ResponseFrame {
            req_id: Some(req_id.into()),
            descriptor: None,
            chunk: Some(BodyChunk {
                index,
                bytes: Bytes::from_static(bytes),
            }),
            end_body_chunk: false,
            total_chunks: None,
        })
    }

    fn end_marker(req_id: &str, total: usize, body: ResponseBody) -> InboundMessage {
        InboundMessage::Response(ResponseFrame {
            req_id: Some(req_id.into()),
            descriptor: Some(ResponseDescriptor {
                status: StatusCode::CREATED,
                headers: WireHeaders::from([("content-type".to_string(), HeaderValues::one("text/plain"))]),
                body,
            }),
            chunk: None,
            end_body_chunk: true,
            total_chunks: Some(total),
        })
    }

    #[test]
    fn test_request_id_matching() {
        assert!(request_id_matches("abc", "abc"));
        assert!(!request_id_matches("abd", "abc"));
        assert!(!request_id_matches("ab", "abc"));
        assert!(!request_id_matches("abcd", "abc"));
        assert!(request_id_matches("", ""));
    }

    #[test]
    fn test_inline_response_resolves_immediately() {
        let mut correlator = ResponseCorrelator::new("abc");
        let completion = correlator.observe(&inline("abc", 200, b"hello")).unwrap();

        assert_eq!(
            completion,
            Completion::Inline {
                status: StatusCode::OK,
                headers: WireHeaders::new(),
                body: Bytes::from_static(b"hello"),
            }
        );
        assert_eq!(correlator.state(), CorrelationState::Resolved);
        assert!(correlator.observe(&inline("abc", 500, b"late")).is_none());
    }

    #[test]
    fn test_foreign_and_disconnect_frames_ignored() {
        let mut correlator = ResponseCorrelator::new("abc");
        assert!(correlator.observe(&InboundMessage::ClientDisconnect).is_none());
        assert!(correlator.observe(&inline("xyz", 200, b"")).is_none());
        assert!(correlator.observe(&inline("abcd", 200, b"")).is_none());
        assert!(correlator.observe(&chunk("xyz", 0, b"a")).is_none());
        assert_eq!(correlator.state(), CorrelationState::Waiting);
    }

    #[test]
    fn test_any_arrival_order_yields_index_order() {
        let frames = || {
            vec![
                chunk("abc", 0, b"aa"),
                chunk("abc", 1, b"bb"),
                chunk("abc", 2, b"cc"),
                end_marker("abc", 3, ResponseBody::Chunked),
            ]
        };
        let orders: [[usize; 4]; 6] = [
            [0, 1, 2, 3],
            [0, 2, 1, 3],
            [3, 2, 1, 0],
            [2, 3, 0, 1],
            [1, 0, 3, 2],
            [0, 3, 2, 1],
        ];

        for order in orders {
            let frames = frames();
            let mut correlator = ResponseCorrelator::new("abc");
            let mut result = None;
            for (n, i) in order.iter().enumerate() {
                let out = correlator.observe(&frames[*i]);
                if n < 3 {
                    assert!(out.is_none(), "finalized early for order {:?}", order);
                    assert_eq!(correlator.state(), CorrelationState::Partial);
                } else {
                    result = out;
                }
            }
            match result {
                Some(Completion::Assembled { status, body, chunks, headers }) => {
                    assert_eq!(status, StatusCode::CREATED);
                    assert_eq!(body, Bytes::from_static(b"aabbcc"));
                    assert_eq!(chunks, 3);
                    assert!(headers.contains_key("content-type"));
                }
                other => panic!("order {:?} produced {:?}", order, other),
            }
        }
    }

    #[test]
    fn test_duplicate_chunk_overwrites() {
        let mut correlator = ResponseCorrelator::new("abc");
        correlator.observe(&chunk("abc", 0, b"first"));
        correlator.observe(&chunk("abc", 0, b"second"));
        let completion = correlator
            .observe(&end_marker("abc", 1, ResponseBody::Chunked))
            .unwrap();

        match completion {
            Completion::Assembled { body, .. } => assert_eq!(body, Bytes::from_static(b"second")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_count_mismatch_keeps_waiting() {
        let mut correlator = ResponseCorrelator::new("abc");
        correlator.observe(&chunk("abc", 0, b"a"));
        assert!(correlator
            .observe(&end_marker("abc", 2, ResponseBody::Chunked))
            .is_none());
        assert_eq!(correlator.state(), CorrelationState::Partial);
    }

    #[test]
    fn test_blob_key_wins_over_chunks() {
        let mut correlator = ResponseCorrelator::new("abc");
        correlator.observe(&chunk("abc", 0, b"ignored"));
        let completion = correlator
            .observe(&end_marker("abc", 1, ResponseBody::Blob("responses/abc".into())))
            .unwrap();

        assert_eq!(completion.mode(), "blob");
        match completion {
            Completion::Blob { key, status, .. } => {
                assert_eq!(key, "responses/abc");
                assert_eq!(status, StatusCode::CREATED);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_timeout_and_resolution_are_exclusive() {
        let mut correlator = ResponseCorrelator::new("abc");
        assert!(correlator.time_out());
        assert!(!correlator.time_out());
        assert!(correlator.observe(&inline("abc", 200, b"late")).is_none());
        assert_eq!(correlator.state(), CorrelationState::TimedOut);

        let mut correlator = ResponseCorrelator::new("abc");
        assert!(correlator.observe(&inline("abc", 200, b"")).is_some());
        assert!(!correlator.time_out());
        assert_eq!(correlator.state(), CorrelationState::Resolved);
    }
}
