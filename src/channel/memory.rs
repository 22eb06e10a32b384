//! In-process channel transport.
//!
//! Each `connect` hands the far end of the new connection to whoever holds
//! the peer receiver, which plays the backend client. Used by the
//! integration tests and for embedding the relay next to its backend.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::channel::{ChannelConnector, ChannelError, Connection};

/// The backend client's end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    /// Frames written by the relay.
    pub from_relay: mpsc::Receiver<String>,
    /// Frames delivered to the relay.
    pub to_relay: mpsc::Sender<String>,
}

/// Connector producing in-memory connections.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    buffer: usize,
    refusals: Arc<AtomicU32>,
}

impl MemoryConnector {
    /// Create a connector and the receiver its peers are delivered on.
    pub fn new(buffer: usize) -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                buffer,
                refusals: Arc::new(AtomicU32::new(0)),
            },
            peers_rx,
        )
    }

    /// Make the next `n` connection attempts fail.
    pub fn refuse_next(&self, n: u32) {
        self.refusals.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChannelConnector for MemoryConnector {
    async fn connect(&self) -> Result<Connection, ChannelError> {
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ChannelError::Closed);
        }

        let (outbound, from_relay) = mpsc::channel(self.buffer);
        let (to_relay, inbound) = mpsc::channel(self.buffer);
        self.peers
            .send(MemoryPeer { from_relay, to_relay })
            .map_err(|_| ChannelError::Closed)?;
        Ok(Connection { outbound, inbound })
    }
}
