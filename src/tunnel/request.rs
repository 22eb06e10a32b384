//! The relay-side view of an inbound HTTP request.

use axum::http::{HeaderMap, Method};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;

use crate::tunnel::message::{headers_to_wire, RequestDescriptor};

/// One inbound HTTP request awaiting a tunneled response.
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    /// Correlation token; unique among in-flight requests.
    pub id: String,
    pub source_ip: String,
    pub headers: HeaderMap,
    pub method: Method,
    /// Path plus query string, as received.
    pub path: String,
    pub body: Option<Bytes>,
}

impl TunnelRequest {
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }

    /// Wire descriptor. The body is base64-encoded inline only when
    /// `inline_body` is set; chunked dispatch sends it separately.
    pub fn descriptor(&self, inline_body: bool) -> RequestDescriptor {
        RequestDescriptor {
            source_ip: self.source_ip.clone(),
            headers: headers_to_wire(&self.headers),
            original_url: self.path.clone(),
            method: self.method.to_string(),
            body: if inline_body {
                self.body.as_ref().map(|b| STANDARD.encode(b))
            } else {
                None
            },
        }
    }
}
