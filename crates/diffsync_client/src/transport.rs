//! Transport abstraction for sync connections.
//!
//! The driver only talks to [`SyncTransport`], so any bidirectional message
//! stream can carry the sync protocol:
//!
//! ```text
//! ┌────────────────────┐    ┌────────────────────┐
//! │ TokioTransport     │    │ test / custom      │
//! │ (tokio-tungstenite)│    │ transports         │
//! │ #[native-sync]     │    │                    │
//! └─────────┬──────────┘    └─────────┬──────────┘
//!           └────────────┬────────────┘
//!                        ▼
//!           ┌──────────────────────┐
//!           │ SyncClient<S, C>     │
//!           │ - Reconnection       │
//!           │ - Outgoing channel   │
//!           └──────────────────────┘
//! ```
//!
//! A [`TransportConnector`] opens a fresh transport for every connection
//! attempt.

/// A message received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// Text frame. Sync messages are JSON text.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping from the peer.
    Ping(Vec<u8>),
    /// Pong from the peer.
    Pong(Vec<u8>),
    /// The peer closed the connection.
    Close,
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A message could not be written.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The connection is already closed.
    #[error("Connection closed")]
    Closed,

    /// Any other transport error.
    #[error("Transport error: {0}")]
    Other(String),
}

/// One open, bidirectional connection.
#[async_trait::async_trait]
pub trait SyncTransport: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a keepalive ping.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Wait for the next message. `None` once the stream has ended.
    async fn recv(&mut self) -> Option<Result<WsMessage, TransportError>>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports.
#[async_trait::async_trait]
pub trait TransportConnector: Send + Sync {
    /// Transport produced by this connector.
    type Transport: SyncTransport;

    /// Connect to `url`.
    async fn connect(&self, url: &str) -> Result<Self::Transport, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        assert_eq!(
            TransportError::ConnectionFailed("refused".to_string()).to_string(),
            "Connection failed: refused"
        );
        assert_eq!(TransportError::Closed.to_string(), "Connection closed");
    }
}
