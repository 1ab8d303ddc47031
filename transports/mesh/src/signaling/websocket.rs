//! WebSocket relay client
//!
//! Speaks the JSON frames of [`protocol`](super::protocol) over a single
//! WebSocket connection. A sender task drains an outgoing queue into the
//! socket; a receiver task decodes text frames into [`RelayInbound`] values.

use super::protocol::{RelayInbound, RelayOutbound};
use super::{RelayChannel, RelayInboundRx};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Relay channel over a WebSocket connection
pub struct WebSocketRelay {
    /// Relay server URL
    url: String,

    /// Outgoing message queue
    tx: mpsc::UnboundedSender<Message>,
}

impl WebSocketRelay {
    /// Connect to the relay at `url`
    ///
    /// Returns the channel and the receiver inbound frames are delivered on.
    pub async fn connect(url: &str) -> Result<(Arc<Self>, RelayInboundRx)> {
        info!("Connecting to relay: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        info!("Connected to relay");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, inbound_tx));

        let relay = Self {
            url: url.to_string(),
            tx,
        };

        Ok((Arc::new(relay), inbound_rx))
    }

    /// Relay server URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sender task: sends messages from channel to WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }

        debug!("Relay sender task terminated");
    }

    /// Receiver task: decodes frames and hands them to the session
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        inbound: mpsc::UnboundedSender<RelayInbound>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match Self::decode(&text) {
                    Ok(frame) => {
                        if inbound.send(frame).is_err() {
                            debug!("Session stopped listening to relay");
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to handle relay frame: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("Relay connection closed");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        debug!("Relay receiver task terminated");
    }

    fn decode(text: &str) -> Result<RelayInbound> {
        debug!("Received relay frame: {}", text);
        RelayInbound::from_json(text)
    }
}

#[async_trait]
impl RelayChannel for WebSocketRelay {
    async fn send(&self, frame: RelayOutbound) -> Result<()> {
        let json = frame.to_json()?;
        self.tx
            .send(Message::Text(json))
            .map_err(|_| Error::WebSocketError("Relay connection is closed".to_string()))
    }

    async fn close(&self) -> Result<()> {
        // Already closed is fine
        let _ = self.tx.send(Message::Close(None));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_frame() {
        let frame = WebSocketRelay::decode(r#"{"type":"broadcast","payload":[1,2]}"#).unwrap();
        assert_eq!(frame.frame_type(), "broadcast");
    }

    #[test]
    fn test_decode_invalid_frame() {
        let err = WebSocketRelay::decode("{\"type\":").unwrap_err();
        assert!(matches!(err, Error::SerializationError(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_websocket_error() {
        let result = WebSocketRelay::connect("ws://127.0.0.1:1/relay").await;
        assert!(matches!(result, Err(Error::WebSocketError(_))));
    }
}
