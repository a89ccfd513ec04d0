//! Connection states and events shared by the session and the driver.

use diffsync_core::Document;
use serde::Serialize;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// A connection attempt is in progress.
    Connecting,
    /// Connected; outgoing messages are sent immediately.
    Open,
    /// The connection closed.
    Closed,
    /// The connection failed.
    Error,
}

/// Events emitted to the embedding application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Connection state changed.
    StateChanged {
        /// The new state.
        state: ConnectionState,
    },
    /// A peer patch was absorbed; `document` is the now-current document.
    DocumentSynced {
        /// The reconciled document.
        document: Document,
    },
    /// Reconnecting after a dropped or failed connection.
    Reconnecting {
        /// Current reconnection attempt number.
        attempt: u32,
    },
    /// An error occurred. Never fatal for the session.
    Error {
        /// Error message.
        message: String,
    },
}

/// Trait for receiving sync events.
pub trait SyncEventHandler: Send + Sync {
    /// Called when a sync event occurs.
    fn on_event(&self, event: SyncEvent);
}

impl<F> SyncEventHandler for F
where
    F: Fn(SyncEvent) + Send + Sync,
{
    fn on_event(&self, event: SyncEvent) {
        self(event)
    }
}
