//! Routing key extraction.
//!
//! The routing key is the requested host, normalized to lowercase since
//! host matching is case-insensitive. The port is kept: backends are bound
//! per host:port as the caller addressed them.

use axum::http::{header::HOST, HeaderMap};

/// Routing key for a request, or `None` when no Host header is present.
pub fn routing_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
}
