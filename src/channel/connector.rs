//! Channel establishment.
//!
//! A connector produces a [`Connection`]: a pair of text-frame queues whose
//! far ends are pumped to and from the actual transport.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::channel::ChannelError;

/// An established duplex channel.
#[derive(Debug)]
pub struct Connection {
    /// Text frames to the backend side, written in order.
    pub outbound: mpsc::Sender<String>,
    /// Text frames from the backend side. Ends when the transport closes.
    pub inbound: mpsc::Receiver<String>,
}

/// Establishes the duplex channel to the backend hub.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self) -> Result<Connection, ChannelError>;
}

/// WebSocket client connecting to the hub endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: String,
    buffer: usize,
}

impl WebSocketConnector {
    pub fn new(endpoint: impl Into<String>, buffer: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            buffer,
        }
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(&self) -> Result<Connection, ChannelError> {
        let (socket, _) = connect_async(self.endpoint.as_str()).await?;
        tracing::info!(endpoint = %self.endpoint, "Tunnel channel connected");

        let (mut sink, mut stream) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<String>(self.buffer);
        let (inbound_tx, inbound) = mpsc::channel::<String>(self.buffer);

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::warn!(error = %e, "Tunnel channel write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::warn!("Discarding non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::info!(endpoint = %endpoint, close = ?frame, "Tunnel channel closed by peer");
                        break;
                    }
                    // Ping/pong are answered by tungstenite.
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(endpoint = %endpoint, error = %e, "Tunnel channel read failed");
                        break;
                    }
                };
                if inbound_tx.send(text).await.is_err() {
                    break;
                }
            }
        });

        Ok(Connection { outbound, inbound })
    }
}
