//! # `diffsync_client`
//!
//! Session client for the differential synchronization engine in
//! [`diffsync_core`].
//!
//! - [`SyncSession`]: connection state machine and outbound queue. Feed it
//!   [`IncomingEvent`]s, execute the [`SessionAction`]s it returns.
//! - [`SyncClient`]: tokio driver owning the transport, reconnection with
//!   exponential backoff and keepalive pings.
//! - [`SyncClientConfig`]: TOML-loadable configuration.
//! - [`SyncTransport`] / [`TransportConnector`]: the transport seam.
//!   `TokioTransport` is available with the `native-sync` feature.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod session;
pub mod sync_client;
pub mod sync_types;
pub mod transport;

/// WebSocket transport over tokio-tungstenite.
#[cfg(feature = "native-sync")]
pub mod tokio_transport;

pub use config::{ReconnectConfig, SyncClientConfig};
pub use error::{ClientError, Result};
pub use session::{IncomingEvent, SessionAction, SyncSession};
pub use sync_client::SyncClient;
pub use sync_types::{ConnectionState, SyncEvent, SyncEventHandler};
#[cfg(feature = "native-sync")]
pub use tokio_transport::{DEFAULT_CONNECT_TIMEOUT, TokioConnector, TokioTransport};
pub use transport::{SyncTransport, TransportConnector, TransportError, WsMessage};
