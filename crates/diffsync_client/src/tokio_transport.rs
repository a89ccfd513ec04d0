//! WebSocket transport over `tokio-tungstenite`.
//!
//! [`TokioConnector`] opens one [`TokioTransport`] per connection attempt,
//! bounded by a connect timeout so a stalled handshake counts as a failed
//! attempt and the driver's backoff takes over.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::transport::{SyncTransport, TransportConnector, TransportError, WsMessage};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Default bound on the TCP + TLS + WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One open WebSocket connection carrying sync messages as text frames.
pub struct TokioTransport {
    ws: WsStream,
}

impl TokioTransport {
    /// Open a connection to `url` (`ws://` or `wss://`).
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let (ws, response) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed(format!("timed out after {timeout:?}"))
            })?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        log::debug!(
            "[TokioTransport] Connected to {} ({})",
            url,
            response.status()
        );
        Ok(Self { ws })
    }

    fn convert(message: Message) -> Option<WsMessage> {
        match message {
            Message::Text(text) => Some(WsMessage::Text(text.to_string())),
            Message::Binary(data) => Some(WsMessage::Binary(data.to_vec())),
            Message::Ping(data) => Some(WsMessage::Ping(data.to_vec())),
            Message::Pong(data) => Some(WsMessage::Pong(data.to_vec())),
            Message::Close(_) => Some(WsMessage::Close),
            Message::Frame(_) => None,
        }
    }
}

#[async_trait::async_trait]
impl SyncTransport for TokioTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.ws
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<WsMessage, TransportError>> {
        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(message) => {
                    if let Some(message) = Self::convert(message) {
                        return Some(Ok(message));
                    }
                }
                Err(e) => return Some(Err(TransportError::Other(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }
}

/// Opens [`TokioTransport`] connections.
#[derive(Debug, Clone, Copy)]
pub struct TokioConnector {
    connect_timeout: Duration,
}

impl TokioConnector {
    /// Connector with [`DEFAULT_CONNECT_TIMEOUT`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The connect timeout in use.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for TokioConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[async_trait::async_trait]
impl TransportConnector for TokioConnector {
    type Transport = TokioTransport;

    async fn connect(&self, url: &str) -> Result<Self::Transport, TransportError> {
        TokioTransport::connect(url, self.connect_timeout).await
    }
}
