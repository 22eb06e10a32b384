//! Shared utilities for relay integration tests.
//!
//! A relay is started on an ephemeral port with in-memory collaborators.
//! The test then plays the backend client through the [`MemoryPeer`] that
//! the relay's first channel acquisition hands out.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use tunnel_relay::blob::MemoryBlobStore;
use tunnel_relay::channel::{ChannelConnector, MemoryConnector, MemoryPeer, WebSocketConnector};
use tunnel_relay::config::{BindingConfig, RegistryConfig, RelayConfig, TunnelConfig};
use tunnel_relay::lifecycle::Collaborators;
use tunnel_relay::routing::StaticRegistry;
use tunnel_relay::tunnel::{OutboundMessage, RequestDescriptor};
use tunnel_relay::{HttpServer, Shutdown};

/// Connection id the test backend is bound under.
pub const BACKEND_ID: &str = "backend-1";

/// A running relay plus the handles a test needs to drive it.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub peers: mpsc::UnboundedReceiver<MemoryPeer>,
    pub connector: MemoryConnector,
    pub blobs: Arc<MemoryBlobStore>,
    shutdown: Shutdown,
}

impl TestRelay {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// The backend end of the relay's channel, once it has been acquired.
    pub async fn backend(&mut self) -> MemoryPeer {
        tokio::time::timeout(Duration::from_secs(5), self.peers.recv())
            .await
            .expect("relay never opened its channel")
            .expect("connector dropped")
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

fn test_config(addr: SocketAddr, tunnel: TunnelConfig) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.listener.bind_address = addr.to_string();
    config.tunnel = tunnel;
    config.channel.connect_attempts = 2;
    config.channel.backoff_base_ms = 1;
    config.channel.backoff_max_ms = 5;
    config.routing.registry = RegistryConfig::Static {
        bindings: vec![BindingConfig {
            host: addr.to_string(),
            connection_id: BACKEND_ID.to_string(),
        }],
    };
    config
}

async fn serve(config: RelayConfig, listener: TcpListener, connector: Arc<dyn ChannelConnector>, blobs: Arc<MemoryBlobStore>) -> Shutdown {
    let registry = match &config.routing.registry {
        RegistryConfig::Static { bindings } => Arc::new(StaticRegistry::new(bindings)),
        RegistryConfig::Http { .. } => unreachable!("tests use static bindings"),
    };
    let server = HttpServer::with_collaborators(
        config,
        Collaborators {
            connector,
            registry,
            blob_store: blobs,
        },
    )
    .expect("server builds");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let (_, config_updates) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });
    shutdown
}

/// Start a relay backed by an in-memory channel.
pub async fn start_relay(tunnel: TunnelConfig) -> TestRelay {
    start_relay_with_buffer(tunnel, 64).await
}

/// Start a relay whose in-memory channel queues at most `buffer` frames
/// in each direction.
pub async fn start_relay_with_buffer(tunnel: TunnelConfig, buffer: usize) -> TestRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (connector, peers) = MemoryConnector::new(buffer);
    let blobs = Arc::new(MemoryBlobStore::new());

    let shutdown = serve(
        test_config(addr, tunnel),
        listener,
        Arc::new(connector.clone()),
        blobs.clone(),
    )
    .await;

    TestRelay {
        addr,
        peers,
        connector,
        blobs,
        shutdown,
    }
}

/// Start a relay whose channel is a real WebSocket to `hub`.
pub async fn start_relay_with_hub(hub: SocketAddr, tunnel: TunnelConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr, tunnel);
    config.channel.endpoint = format!("ws://{}/", hub);

    let connector = Arc::new(WebSocketConnector::new(config.channel.endpoint.clone(), 64));
    let shutdown = serve(config, listener, connector, Arc::new(MemoryBlobStore::new())).await;
    (addr, shutdown)
}

/// Minimal WebSocket hub. Each accepted connection is exposed as a
/// [`MemoryPeer`] so tests drive it the same way as the in-memory channel.
pub async fn start_ws_hub() -> (SocketAddr, mpsc::UnboundedReceiver<MemoryPeer>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (peers_tx, peers) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(socket) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            let (mut sink, mut source) = socket.split();
            let (from_tx, from_relay) = mpsc::channel::<String>(64);
            let (to_relay, mut to_rx) = mpsc::channel::<String>(64);

            tokio::spawn(async move {
                while let Some(Ok(message)) = source.next().await {
                    if let Message::Text(text) = message {
                        if from_tx.send(text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                }
            });
            tokio::spawn(async move {
                while let Some(text) = to_rx.recv().await {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            });

            let _ = peers_tx.send(MemoryPeer { from_relay, to_relay });
        }
    });
    (addr, peers)
}

/// A request as the backend client reconstructs it from the channel.
#[derive(Debug)]
pub struct ForwardedRequest {
    pub target: String,
    pub req_id: String,
    pub req: RequestDescriptor,
    pub body: Vec<u8>,
    /// Number of chunk frames, zero for inline forwarding.
    pub chunks: usize,
}

async fn next_frame(peer: &mut MemoryPeer) -> OutboundMessage {
    let text = tokio::time::timeout(Duration::from_secs(5), peer.from_relay.recv())
        .await
        .expect("no frame from relay")
        .expect("relay closed the channel");
    serde_json::from_str(&text).expect("relay sent an unparsable frame")
}

/// Read frames until one whole request has arrived.
pub async fn next_request(peer: &mut MemoryPeer) -> ForwardedRequest {
    let mut chunks: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
    loop {
        match next_frame(peer).await {
            OutboundMessage::Forward { target, data } => {
                let body = data
                    .req
                    .body
                    .as_deref()
                    .map(|b| STANDARD.decode(b).unwrap())
                    .unwrap_or_default();
                return ForwardedRequest {
                    target,
                    req_id: data.req_id,
                    req: data.req,
                    body,
                    chunks: 0,
                };
            }
            OutboundMessage::ForwardChunk { target, data } => {
                if data.end_body_chunk {
                    assert_eq!(data.total_chunks, Some(chunks.len()));
                    return ForwardedRequest {
                        target,
                        req_id: data.req_id,
                        req: data.req.expect("end marker carries req"),
                        chunks: chunks.len(),
                        body: chunks.into_values().flatten().collect(),
                    };
                }
                let index = data.body_chunk_index.expect("chunk index");
                let bytes = STANDARD.decode(data.body_chunk.expect("chunk body")).unwrap();
                chunks.insert(index, bytes);
            }
        }
    }
}

/// Single-frame response with an inline body.
pub fn inline_response(req_id: &str, status: u16, headers: Value, body: &[u8]) -> String {
    json!({
        "action": "response",
        "data": {
            "reqId": req_id,
            "res": { "status": status, "headers": headers, "body": STANDARD.encode(body) }
        }
    })
    .to_string()
}

/// One chunk of a chunked response.
pub fn chunk_frame(req_id: &str, index: usize, bytes: &[u8]) -> String {
    json!({
        "action": "response",
        "data": { "reqId": req_id, "bodyChunk": STANDARD.encode(bytes), "bodyChunkIndex": index }
    })
    .to_string()
}

/// End-of-body marker for a chunked response.
pub fn end_marker(req_id: &str, status: u16, headers: Value, total_chunks: usize) -> String {
    json!({
        "action": "response",
        "data": {
            "reqId": req_id,
            "endBodyChunk": true,
            "totalChunks": total_chunks,
            "res": { "status": status, "headers": headers }
        }
    })
    .to_string()
}

/// Response whose body was offloaded to the blob store.
pub fn blob_response(req_id: &str, status: u16, headers: Value, key: &str) -> String {
    json!({
        "action": "response",
        "data": {
            "reqId": req_id,
            "res": { "status": status, "headers": headers, "s3Key": key }
        }
    })
    .to_string()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
