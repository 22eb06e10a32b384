//! Duplex channel subsystem.
//!
//! # Data Flow
//! ```text
//! ChannelManager::acquire()
//!     → connector.rs (WebSocket hub / in-memory) → Connection
//!     → manager.rs spawns the inbound pump for that connection
//!
//! Outbound: dispatcher → manager.send_single_frame / send_chunked
//!     → Connection.outbound (text frames, in order)
//!
//! Inbound: Connection.inbound
//!     → InboundMessage::parse (malformed frames logged & dropped)
//!     → listeners.rs fan-out to every registered request listener
//! ```
//!
//! # Design Decisions
//! - One channel per relay process; all requests multiplex over it
//! - The listener registry outlives individual connections, so a reconnect
//!   does not orphan requests already waiting
//! - Listeners deregister exactly once, explicitly or on drop

pub mod connector;
pub mod listeners;
pub mod manager;
pub mod memory;

use thiserror::Error;

pub use connector::{ChannelConnector, Connection, WebSocketConnector};
pub use listeners::{Listener, ListenerRegistry};
pub use manager::{ChannelHandle, ChannelManager};
pub use memory::{MemoryConnector, MemoryPeer};

/// Errors raised by the channel transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("channel closed")]
    Closed,

    #[error("no connection after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<ChannelError>,
    },

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ChannelError::WebSocket(Box::new(e))
    }
}
