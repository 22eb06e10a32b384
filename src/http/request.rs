//! Request inspection helpers.
//!
//! # Responsibilities
//! - Generate a request ID when the caller did not supply one
//! - Detect event-stream requests, which cannot be tunneled
//! - Read the body under the configured size limit
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Declared `content-length` is checked before the body is read

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Uri};
use bytes::Bytes;
use http_body_util::BodyExt;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::error::RelayError;

/// Generates a UUID v4 request ID.
#[derive(Clone, Copy, Debug, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Value of the correlation header, if present and printable.
pub fn request_id(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// True when the caller asks for `text/event-stream`.
pub fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers.get_all(header::ACCEPT).iter().any(|v| {
        String::from_utf8_lossy(v.as_bytes())
            .to_ascii_lowercase()
            .contains("text/event-stream")
    })
}

/// Path plus query, as forwarded in `originalUrl`.
pub fn original_url(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}

/// Collect the body, rejecting anything over `limit` bytes.
pub async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Option<Bytes>, RelayError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(RelayError::BodyTooLarge { limit });
    }

    let collected = http_body_util::Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| {
            if e.is::<http_body_util::LengthLimitError>() {
                RelayError::BodyTooLarge { limit }
            } else {
                RelayError::BodyRead(e.to_string())
            }
        })?
        .to_bytes();

    Ok((!collected.is_empty()).then_some(collected))
}
