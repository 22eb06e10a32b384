//! Forwarding of tunnel requests onto the channel.
//!
//! Bodies up to the inline threshold travel in one `forward` frame. Larger
//! bodies go out as ordered `forward-chunk` frames followed by an
//! end-of-body marker. The dispatcher never waits for a reply.

use std::sync::Arc;

use crate::channel::{ChannelError, ChannelHandle, ChannelManager};
use crate::config::TunnelConfig;
use crate::routing::ChannelRef;
use crate::tunnel::message::OutboundMessage;
use crate::tunnel::request::TunnelRequest;

/// How a request was put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Inline,
    Chunked { chunks: usize },
}

impl Dispatch {
    pub fn mode(&self) -> &'static str {
        match self {
            Dispatch::Inline => "inline",
            Dispatch::Chunked { .. } => "chunked",
        }
    }
}

/// Serializes requests and writes them through the channel manager.
#[derive(Clone)]
pub struct RequestDispatcher {
    channels: Arc<ChannelManager>,
}

impl RequestDispatcher {
    pub fn new(channels: Arc<ChannelManager>) -> Self {
        Self { channels }
    }

    /// Send `request` to the backend client behind `target`.
    pub async fn dispatch(
        &self,
        channel: &ChannelHandle,
        target: &ChannelRef,
        request: &TunnelRequest,
        settings: &TunnelConfig,
    ) -> Result<Dispatch, ChannelError> {
        let body_len = request.body_len();

        if body_len > settings.max_inline_body_bytes {
            tracing::debug!(
                request_id = %request.id,
                body_len,
                chunk_size = settings.chunk_size_bytes,
                "Chunking request body"
            );
            let payload = request.body.clone().unwrap_or_default();
            let chunks = self
                .channels
                .send_chunked(
                    channel,
                    &target.connection_id,
                    &request.id,
                    request.descriptor(false),
                    &payload,
                    settings.chunk_size_bytes,
                )
                .await?;
            return Ok(Dispatch::Chunked { chunks });
        }

        let frame = OutboundMessage::forward(&target.connection_id, &request.id, request.descriptor(true));
        self.channels.send_single_frame(channel, &frame).await?;
        Ok(Dispatch::Inline)
    }
}
