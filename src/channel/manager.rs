//! Ownership of the process's single duplex channel.
//!
//! # Responsibilities
//! - Establish the channel lazily and re-establish it after it closes
//! - Pump inbound frames into the listener registry
//! - Write single frames and ordered chunk sequences

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::channel::{ChannelConnector, ChannelError, Connection, Listener, ListenerRegistry};
use crate::config::ChannelConfig;
use crate::observability::metrics;
use crate::resilience::ReconnectBackoff;
use crate::tunnel::message::{InboundMessage, OutboundMessage, RequestDescriptor};

/// Cloneable handle to one established connection.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    outbound: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
    generation: u64,
}

impl ChannelHandle {
    /// True until the transport is seen to close in either direction.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    /// Connection counter; increments on every (re)establishment.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    async fn send_text(&self, text: String) -> Result<(), ChannelError> {
        if self.outbound.send(text).await.is_err() {
            self.open.store(false, Ordering::Release);
            return Err(ChannelError::Closed);
        }
        Ok(())
    }
}

/// Owns the channel and the listener registry shared by all requests.
pub struct ChannelManager {
    connector: Arc<dyn ChannelConnector>,
    listeners: Arc<ListenerRegistry>,
    backoff: ReconnectBackoff,
    connect_attempts: u32,
    current: Mutex<Option<ChannelHandle>>,
    generation: AtomicU64,
}

impl ChannelManager {
    pub fn new(connector: Arc<dyn ChannelConnector>, config: &ChannelConfig) -> Self {
        Self {
            connector,
            listeners: ListenerRegistry::new(),
            backoff: ReconnectBackoff::from(config),
            connect_attempts: config.connect_attempts.max(1),
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Register an inbound listener for one request.
    pub fn register_listener(&self) -> Listener {
        self.listeners.register()
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    /// Return the live channel, establishing it if needed.
    pub async fn acquire(&self) -> Result<ChannelHandle, ChannelError> {
        let mut current = self.current.lock().await;
        if let Some(handle) = current.as_ref().filter(|h| h.is_open()) {
            return Ok(handle.clone());
        }

        let handle = self.establish().await?;
        *current = Some(handle.clone());
        Ok(handle)
    }

    async fn establish(&self) -> Result<ChannelHandle, ChannelError> {
        let mut last_error = ChannelError::Closed;
        for attempt in 1..=self.connect_attempts {
            match self.connector.connect().await {
                Ok(connection) => {
                    metrics::record_channel_connect("success");
                    return Ok(self.start(connection));
                }
                Err(e) => {
                    metrics::record_channel_connect("failure");
                    tracing::warn!(attempt, max_attempts = self.connect_attempts, error = %e, "Tunnel channel connect failed");
                    last_error = e;
                    if attempt < self.connect_attempts {
                        tokio::time::sleep(self.backoff.delay(attempt)).await;
                    }
                }
            }
        }
        Err(ChannelError::Exhausted {
            attempts: self.connect_attempts,
            last: Box::new(last_error),
        })
    }

    fn start(&self, connection: Connection) -> ChannelHandle {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let open = Arc::new(AtomicBool::new(true));
        let Connection {
            outbound,
            mut inbound,
        } = connection;

        let listeners = Arc::clone(&self.listeners);
        let pump_open = Arc::clone(&open);
        tokio::spawn(async move {
            while let Some(text) = inbound.recv().await {
                match InboundMessage::parse(&text) {
                    Ok(message) => {
                        let delivered = listeners.dispatch(Arc::new(message));
                        tracing::trace!(generation, delivered, "Inbound message dispatched");
                    }
                    Err(e) => {
                        metrics::record_malformed_frame();
                        tracing::warn!(generation, error = %e, "Discarding malformed inbound message");
                    }
                }
            }
            pump_open.store(false, Ordering::Release);
            tracing::warn!(generation, "Tunnel channel inbound stream ended");
        });

        tracing::info!(generation, "Tunnel channel established");
        ChannelHandle {
            outbound,
            open,
            generation,
        }
    }

    /// Write one frame.
    pub async fn send_single_frame(
        &self,
        channel: &ChannelHandle,
        message: &OutboundMessage,
    ) -> Result<(), ChannelError> {
        channel.send_text(message.to_json()?).await
    }

    /// Write `payload` as ordered chunk frames followed by an end marker
    /// carrying `req` and the chunk count. Returns the chunk count.
    pub async fn send_chunked(
        &self,
        channel: &ChannelHandle,
        target: &str,
        req_id: &str,
        req: RequestDescriptor,
        payload: &[u8],
        chunk_size: usize,
    ) -> Result<usize, ChannelError> {
        let mut total = 0;
        for (index, chunk) in payload.chunks(chunk_size.max(1)).enumerate() {
            let frame = OutboundMessage::chunk(target, req_id, index, chunk);
            self.send_single_frame(channel, &frame).await?;
            total = index + 1;
        }
        self.send_single_frame(channel, &OutboundMessage::end_of_body(target, req_id, req, total))
            .await?;
        metrics::record_chunks("outbound", total);
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryConnector;
    use crate::tunnel::message::{ChunkData, WireHeaders};
    use std::time::Duration;

    fn config() -> ChannelConfig {
        ChannelConfig {
            connect_attempts: 3,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            ..ChannelConfig::default()
        }
    }

    fn descriptor() -> RequestDescriptor {
        RequestDescriptor {
            source_ip: "127.0.0.1".into(),
            headers: WireHeaders::new(),
            original_url: "/upload".into(),
            method: "PUT".into(),
            body: None,
        }
    }

    #[tokio::test]
    async fn test_acquire_reuses_open_channel() {
        let (connector, mut peers) = MemoryConnector::new(16);
        let manager = ChannelManager::new(Arc::new(connector), &config());

        let first = manager.acquire().await.unwrap();
        let second = manager.acquire().await.unwrap();
        assert_eq!(first.generation(), second.generation());
        assert!(peers.try_recv().is_ok());
        assert!(peers.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconnects_after_close() {
        let (connector, mut peers) = MemoryConnector::new(16);
        let manager = ChannelManager::new(Arc::new(connector), &config());

        let first = manager.acquire().await.unwrap();
        drop(peers.recv().await.unwrap());
        // Let the pump observe the closed inbound side.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!first.is_open());

        let second = manager.acquire().await.unwrap();
        assert_eq!(second.generation(), first.generation() + 1);
    }

    #[tokio::test]
    async fn test_connect_retries_then_gives_up() {
        let (connector, _peers) = MemoryConnector::new(16);
        connector.refuse_next(2);
        let manager = ChannelManager::new(Arc::new(connector.clone()), &config());
        assert!(manager.acquire().await.is_ok());

        let (connector, _peers) = MemoryConnector::new(16);
        connector.refuse_next(10);
        let manager = ChannelManager::new(Arc::new(connector), &config());
        let err = manager.acquire().await.unwrap_err();
        assert!(matches!(err, ChannelError::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_send_chunked_order_and_end_marker() {
        let (connector, mut peers) = MemoryConnector::new(16);
        let manager = ChannelManager::new(Arc::new(connector), &config());
        let channel = manager.acquire().await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        let payload: Vec<u8> = (0..10u8).collect();
        let total = manager
            .send_chunked(&channel, "conn-1", "req-1", descriptor(), &payload, 4)
            .await
            .unwrap();
        assert_eq!(total, 3);

        let mut indices = Vec::new();
        for _ in 0..3 {
            let frame: OutboundMessage = serde_json::from_str(&peer.from_relay.recv().await.unwrap()).unwrap();
            match frame {
                OutboundMessage::ForwardChunk { target, data } => {
                    assert_eq!(target, "conn-1");
                    assert!(!data.end_body_chunk);
                    indices.push(data.body_chunk_index.unwrap());
                }
                other => panic!("unexpected frame {:?}", other),
            }
        }
        assert_eq!(indices, vec![0, 1, 2]);

        let end: OutboundMessage = serde_json::from_str(&peer.from_relay.recv().await.unwrap()).unwrap();
        match end {
            OutboundMessage::ForwardChunk {
                data:
                    ChunkData {
                        end_body_chunk: true,
                        total_chunks: Some(3),
                        req: Some(req),
                        ..
                    },
                ..
            } => assert_eq!(req.original_url, "/upload"),
            other => panic!("expected end marker, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_inbound_is_dropped_and_listener_stays_armed() {
        let (connector, mut peers) = MemoryConnector::new(16);
        let manager = ChannelManager::new(Arc::new(connector), &config());
        let _channel = manager.acquire().await.unwrap();
        let peer = peers.recv().await.unwrap();
        let mut listener = manager.register_listener();

        peer.to_relay.send("{not json".into()).await.unwrap();
        peer.to_relay
            .send(r#"{"action":"CLIENT_DISCONNECT"}"#.into())
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), listener.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*received, InboundMessage::ClientDisconnect);
        assert!(listener.is_registered());
    }
}
