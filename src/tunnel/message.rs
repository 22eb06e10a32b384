//! Wire envelopes exchanged with the backend client.
//!
//! Outbound frames are serialized from [`OutboundMessage`]; inbound text is
//! parsed into the closed [`InboundMessage`] type, with base64 payloads
//! decoded at parse time so downstream code only sees bytes.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Action carried by backend-client disconnect notices.
pub const CLIENT_DISCONNECT_ACTION: &str = "CLIENT_DISCONNECT";

/// One header's values as carried on the wire: a string, a number, or a list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "HeaderRepr", into = "HeaderRepr")]
pub struct HeaderValues(Vec<String>);

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum HeaderRepr {
    One(String),
    Number(serde_json::Number),
    Many(Vec<String>),
}

impl From<HeaderRepr> for HeaderValues {
    fn from(repr: HeaderRepr) -> Self {
        match repr {
            HeaderRepr::One(v) => Self(vec![v]),
            HeaderRepr::Number(n) => Self(vec![n.to_string()]),
            HeaderRepr::Many(vs) => Self(vs),
        }
    }
}

impl From<HeaderValues> for HeaderRepr {
    fn from(mut values: HeaderValues) -> Self {
        if values.0.len() == 1 {
            HeaderRepr::One(values.0.remove(0))
        } else {
            HeaderRepr::Many(values.0)
        }
    }
}

impl HeaderValues {
    pub fn one(value: impl Into<String>) -> Self {
        Self(vec![value.into()])
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Header table as carried on the wire, keyed by lowercase name.
pub type WireHeaders = BTreeMap<String, HeaderValues>;

/// Convert an HTTP header map into the wire representation.
///
/// Repeated headers are joined with `", "` except `set-cookie`, which keeps
/// one entry per value.
pub fn headers_to_wire(headers: &HeaderMap) -> WireHeaders {
    let mut wire = WireHeaders::new();
    for name in headers.keys() {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        let values = if values.len() > 1 && *name != axum::http::header::SET_COOKIE {
            vec![values.join(", ")]
        } else {
            values
        };
        wire.insert(name.as_str().to_string(), HeaderValues(values));
    }
    wire
}

/// Look up a header case-insensitively, joining repeated values.
pub fn find_header(wire: &WireHeaders, name: &str) -> Option<String> {
    wire.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, values)| values.iter().collect::<Vec<_>>().join(", "))
}

/// Convert wire headers into an HTTP header map, skipping the names in `skip`.
///
/// Entries that are not valid HTTP are dropped with a warning.
pub fn wire_to_headers(wire: &WireHeaders, skip: &[HeaderName]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, values) in wire {
        let name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(header = %name, "Dropping invalid response header name");
                continue;
            }
        };
        if skip.contains(&name) {
            continue;
        }
        for value in values.iter() {
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    headers.append(name.clone(), v);
                }
                Err(_) => tracing::warn!(header = %name, "Dropping invalid response header value"),
            }
        }
    }
    headers
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// The `req` object describing a forwarded HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    pub source_ip: String,
    pub headers: WireHeaders,
    pub original_url: String,
    pub method: String,
    /// Base64 body, present only on whole-request frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Payload of a whole-request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardData {
    pub req_id: String,
    pub req: RequestDescriptor,
}

/// Payload of a body-chunk frame or of the end-of-body marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkData {
    pub req_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_chunk_index: Option<usize>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub end_body_chunk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    /// Request metadata, carried by the end-of-body marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req: Option<RequestDescriptor>,
}

/// Frames the relay sends to the backend client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum OutboundMessage {
    Forward { target: String, data: ForwardData },
    ForwardChunk { target: String, data: ChunkData },
}

impl OutboundMessage {
    /// Whole request with its body inline.
    pub fn forward(target: &str, req_id: &str, req: RequestDescriptor) -> Self {
        OutboundMessage::Forward {
            target: target.to_string(),
            data: ForwardData {
                req_id: req_id.to_string(),
                req,
            },
        }
    }

    /// One body chunk.
    pub fn chunk(target: &str, req_id: &str, index: usize, chunk: &[u8]) -> Self {
        OutboundMessage::ForwardChunk {
            target: target.to_string(),
            data: ChunkData {
                req_id: req_id.to_string(),
                body_chunk: Some(STANDARD.encode(chunk)),
                body_chunk_index: Some(index),
                end_body_chunk: false,
                total_chunks: None,
                req: None,
            },
        }
    }

    /// End-of-body marker declaring the chunk count.
    pub fn end_of_body(
        target: &str,
        req_id: &str,
        req: RequestDescriptor,
        total_chunks: usize,
    ) -> Self {
        OutboundMessage::ForwardChunk {
            target: target.to_string(),
            data: ChunkData {
                req_id: req_id.to_string(),
                body_chunk: None,
                body_chunk_index: None,
                end_body_chunk: true,
                total_chunks: Some(total_chunks),
                req: Some(req),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Why an inbound text frame was rejected.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 in {field}: {source}")]
    Base64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("invalid status code {0}")]
    Status(u16),

    #[error("body chunk without bodyChunkIndex")]
    ChunkWithoutIndex,

    #[error("message without data")]
    MissingData,
}

/// How a response body is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Decoded body carried in the frame (possibly empty).
    Inline(Bytes),
    /// Body offloaded to the blob store under this key.
    Blob(String),
    /// Body follows as chunk frames.
    Chunked,
}

/// Status, headers and body representation of a tunneled response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDescriptor {
    pub status: StatusCode,
    pub headers: WireHeaders,
    pub body: ResponseBody,
}

/// One fragment of a chunked response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyChunk {
    pub index: usize,
    pub bytes: Bytes,
}

/// A parsed response-bearing frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub req_id: Option<String>,
    pub descriptor: Option<ResponseDescriptor>,
    pub chunk: Option<BodyChunk>,
    pub end_body_chunk: bool,
    pub total_chunks: Option<usize>,
}

impl ResponseFrame {
    /// True when the frame carries none of the chunking fields.
    pub fn is_self_contained(&self) -> bool {
        self.chunk.is_none() && !self.end_body_chunk && self.total_chunks.is_none()
    }
}

/// Frames received from the backend client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// The backend client went away. Carries no request state.
    ClientDisconnect,
    Response(ResponseFrame),
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    data: Option<RawResponseFrame>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponseFrame {
    #[serde(default)]
    req_id: Option<String>,
    #[serde(default)]
    res: Option<RawDescriptor>,
    #[serde(default)]
    body_chunk: Option<String>,
    #[serde(default)]
    body_chunk_index: Option<usize>,
    #[serde(default)]
    end_body_chunk: Option<bool>,
    #[serde(default)]
    total_chunks: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    status: u16,
    #[serde(default)]
    headers: WireHeaders,
    #[serde(default)]
    body: Option<String>,
    #[serde(default, alias = "blobKey")]
    s3_key: Option<String>,
}

fn decode(field: &'static str, value: &str) -> Result<Bytes, FrameError> {
    STANDARD
        .decode(value)
        .map(Bytes::from)
        .map_err(|source| FrameError::Base64 { field, source })
}

impl RawDescriptor {
    fn into_descriptor(self, end_of_body: bool) -> Result<ResponseDescriptor, FrameError> {
        let status = StatusCode::from_u16(self.status).map_err(|_| FrameError::Status(self.status))?;
        let body = match (self.s3_key, end_of_body) {
            (Some(key), _) => ResponseBody::Blob(key),
            (None, true) => ResponseBody::Chunked,
            (None, false) => match self.body.as_deref() {
                Some(b) => ResponseBody::Inline(decode("res.body", b)?),
                None => ResponseBody::Inline(Bytes::new()),
            },
        };
        Ok(ResponseDescriptor {
            status,
            headers: self.headers,
            body,
        })
    }
}

impl InboundMessage {
    /// Parse one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let envelope: RawEnvelope = serde_json::from_str(text)?;
        if envelope.action.as_deref() == Some(CLIENT_DISCONNECT_ACTION) {
            return Ok(InboundMessage::ClientDisconnect);
        }
        let raw = envelope.data.ok_or(FrameError::MissingData)?;

        let end_body_chunk = raw.end_body_chunk.unwrap_or(false);
        let chunk = match raw.body_chunk {
            Some(encoded) => Some(BodyChunk {
                index: raw.body_chunk_index.ok_or(FrameError::ChunkWithoutIndex)?,
                bytes: decode("bodyChunk", &encoded)?,
            }),
            None => None,
        };
        let descriptor = raw
            .res
            .map(|res| res.into_descriptor(end_body_chunk))
            .transpose()?;

        Ok(InboundMessage::Response(ResponseFrame {
            req_id: raw.req_id,
            descriptor,
            chunk,
            end_body_chunk,
            total_chunks: raw.total_chunks,
        }))
    }
}
