//! Response construction for tunneled requests.
//!
//! # Responsibilities
//! - Turn a correlated completion into the caller's response
//! - Pass status and headers through, minus `transfer-encoding`
//!
//! # Design Decisions
//! - Blob-backed bodies stream through without buffering
//! - Transfer framing is left to the HTTP stack

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;

use crate::blob::BlobOffloadResolver;
use crate::error::RelayError;
use crate::tunnel::message::{find_header, wire_to_headers, WireHeaders};
use crate::tunnel::Completion;

/// Build a response from a descriptor's status and headers.
pub fn build_response(status: StatusCode, headers: &WireHeaders, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = wire_to_headers(headers, &[header::TRANSFER_ENCODING]);
    response
}

/// Deliver a completion, opening the blob stream when the body was offloaded.
pub async fn completion_response(
    completion: Completion,
    resolver: &BlobOffloadResolver,
    request_id: &str,
) -> Result<Response, RelayError> {
    match completion {
        Completion::Inline { status, headers, body } => Ok(build_response(status, &headers, Body::from(body))),
        Completion::Assembled {
            status, headers, body, ..
        } => Ok(build_response(status, &headers, Body::from(body))),
        Completion::Blob { status, headers, key } => {
            let cache_control = find_header(&headers, "cache-control");
            let body = resolver.open(request_id, &key, cache_control.as_deref()).await?;
            Ok(build_response(status, &headers, body))
        }
    }
}
