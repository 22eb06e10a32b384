//! Relay-wide error taxonomy.
//!
//! Every failure that terminates a tunneled request is a [`RelayError`] and
//! maps onto exactly one HTTP status with a short plain-text body. Failures
//! that are recovered locally (malformed inbound frames, blob cleanup) are
//! logged where they happen and never become a `RelayError`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::blob::BlobError;
use crate::channel::ChannelError;
use crate::routing::RegistryError;

/// Terminal failures for a single tunneled request.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No backend client is bound to the requested routing key.
    #[error("no tunnel client listening for {0}")]
    NoBackendBound(String),

    /// The registry behind the routing cache could not be queried.
    #[error("connection registry unavailable: {0}")]
    RegistryFailure(#[from] RegistryError),

    /// The duplex channel could not be established.
    #[error("tunnel channel unavailable: {0}")]
    ChannelUnavailable(#[source] ChannelError),

    /// Writing the request onto the channel failed mid-dispatch.
    #[error("failed to forward request over tunnel channel: {0}")]
    ChannelSend(#[source] ChannelError),

    /// The caller asked for an event-stream response.
    #[error("text/event-stream not supported")]
    UnsupportedStreamingRequest,

    /// The inbound request body exceeded the configured limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// The inbound request body could not be read.
    #[error("failed to read request body: {0}")]
    BodyRead(String),

    /// No terminating message arrived within the response window.
    #[error("timed out waiting for tunnel client response")]
    ResponseTimeout,

    /// The blob-backed response body could not be fetched.
    #[error("failed to fetch offloaded response body: {0}")]
    BlobFetchFailure(#[source] BlobError),
}

impl RelayError {
    /// HTTP status surfaced to the caller for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::NoBackendBound(_) => StatusCode::PRECONDITION_FAILED,
            RelayError::RegistryFailure(_) => StatusCode::BAD_GATEWAY,
            RelayError::ChannelUnavailable(_) | RelayError::ChannelSend(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RelayError::UnsupportedStreamingRequest => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::BodyRead(_) => StatusCode::BAD_REQUEST,
            RelayError::ResponseTimeout => StatusCode::REQUEST_TIMEOUT,
            RelayError::BlobFetchFailure(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::NoBackendBound(_) => "no_backend",
            RelayError::RegistryFailure(_) => "registry",
            RelayError::ChannelUnavailable(_) => "channel_unavailable",
            RelayError::ChannelSend(_) => "channel_send",
            RelayError::UnsupportedStreamingRequest => "unsupported_streaming",
            RelayError::BodyTooLarge { .. } => "body_too_large",
            RelayError::BodyRead(_) => "body_read",
            RelayError::ResponseTimeout => "timeout",
            RelayError::BlobFetchFailure(_) => "blob_fetch",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        // Collaborator details stay in the logs, not in the caller's body.
        let body = match &self {
            RelayError::ChannelUnavailable(_) | RelayError::ChannelSend(_) => {
                "websocket connection unavailable".to_string()
            }
            RelayError::RegistryFailure(_) => "connection registry unavailable".to_string(),
            RelayError::BlobFetchFailure(_) => "failed to stream tunnel response".to_string(),
            other => other.to_string(),
        };
        (self.status(), body).into_response()
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
