//! Message-driven session protocol handler.
//!
//! `SyncSession` holds the connection state and the outbound queue and
//! drives engine calls. It never touches a transport: the platform layer
//! feeds it [`IncomingEvent`]s and executes the returned
//! [`SessionAction`]s.
//!
//! ```text
//!           ┌──────────────────┐
//!           │   SyncClient     │  ← owns transport, reconnection
//!           └────────┬─────────┘
//!                    ▼
//!           ┌──────────────────┐
//!           │   SyncSession    │  ← state machine, outbound queue
//!           └────────┬─────────┘
//!                    ▼
//!           ┌──────────────────┐
//!           │   SyncEngine     │  ← diff / patch
//!           └──────────────────┘
//! ```
//!
//! While the connection is not open, outgoing messages are queued. When it
//! opens the queue drains in order, with queued patches for the same
//! (client, document) pair merged into the first one.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use diffsync_core::{AddMessage, Document, Strategy, SyncEngine, SyncError, WireMessage};

use crate::error::Result;
use crate::sync_types::{ConnectionState, SyncEvent};

/// Events fed into the session from the platform layer.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingEvent {
    /// A connection attempt started.
    Connecting,
    /// The connection opened.
    Opened,
    /// A text message arrived.
    Message(String),
    /// The connection closed.
    Closed,
    /// The connection failed.
    Error(String),
}

/// Actions returned by the session for the platform layer to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Send a message over the open connection.
    Send(WireMessage),
    /// Emit an event to the application.
    Emit(SyncEvent),
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    queue: VecDeque<WireMessage>,
}

/// Session state machine over one engine.
pub struct SyncSession<S: Strategy> {
    engine: Arc<SyncEngine<S>>,
    client_id: String,
    inner: Mutex<Inner>,
}

impl<S: Strategy> SyncSession<S> {
    /// Create a session in the `Connecting` state with an empty queue.
    pub fn new(engine: Arc<SyncEngine<S>>, client_id: impl Into<String>) -> Self {
        Self {
            engine,
            client_id: client_id.into(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Connecting,
                queue: VecDeque::new(),
            }),
        }
    }

    /// The engine driven by this session.
    pub fn engine(&self) -> &Arc<SyncEngine<S>> {
        &self.engine
    }

    /// Client id used for new documents.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().unwrap().state
    }

    /// Number of queued outgoing messages.
    pub fn queued(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// Process a connection event and return actions for the platform layer.
    pub fn process(&self, event: IncomingEvent) -> Vec<SessionAction> {
        match event {
            IncomingEvent::Connecting => self.transition(ConnectionState::Connecting),
            IncomingEvent::Opened => self.handle_opened(),
            IncomingEvent::Message(text) => self.handle_message(&text),
            IncomingEvent::Closed => self.transition(ConnectionState::Closed),
            IncomingEvent::Error(message) => {
                log::warn!("[SyncSession] Connection error: {}", message);
                let mut actions = vec![SessionAction::Emit(SyncEvent::Error { message })];
                actions.extend(self.transition(ConnectionState::Error));
                actions
            }
        }
    }

    // =========================================================================
    // Application calls
    // =========================================================================

    /// Register a document with the engine and announce it to the peer.
    pub fn add_document(&self, document: &Document) -> Result<Vec<SessionAction>> {
        let mut inner = self.inner.lock().unwrap();
        self.engine.add_document(document, &self.client_id)?;
        let message = WireMessage::Add(AddMessage {
            id: document.id.clone(),
            client_id: self.client_id.clone(),
            content: document.content.clone(),
        });
        Ok(Self::dispatch(&mut inner, message))
    }

    /// Diff `document` against its shadow and send or queue the result.
    pub fn sync(&self, document: &Document) -> Result<Vec<SessionAction>> {
        let mut inner = self.inner.lock().unwrap();
        let message = self.engine.diff(document)?;
        Ok(Self::dispatch(&mut inner, WireMessage::Patch(message)))
    }

    /// Push local state for `id`: with an empty queue, sync the stored
    /// document; otherwise flush the queue (sent only when open).
    pub fn fetch(&self, id: &str) -> Result<Vec<SessionAction>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.is_empty() {
            let document = self.engine.get_document(id)?;
            let message = self.engine.diff(&document)?;
            return Ok(Self::dispatch(&mut inner, WireMessage::Patch(message)));
        }

        if inner.state != ConnectionState::Open {
            log::debug!(
                "[SyncSession] Fetch for {} deferred, {} messages queued",
                id,
                inner.queue.len()
            );
            return Ok(Vec::new());
        }
        Ok(Self::drain(&mut inner))
    }

    /// The engine's current document for `id`.
    pub fn get_document(&self, id: &str) -> Result<Document> {
        Ok(self.engine.get_document(id)?)
    }

    /// Forget a document locally and drop its queued messages.
    pub fn remove_document(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.retain(|message| message.document_id() != id);
        self.engine.remove_document(id)?;
        Ok(())
    }

    /// Put unsent messages back at the head of the queue, keeping their
    /// order.
    pub fn requeue_front(&self, messages: Vec<WireMessage>) {
        if messages.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        log::debug!("[SyncSession] Requeueing {} unsent messages", messages.len());
        for message in messages.into_iter().rev() {
            inner.queue.push_front(message);
        }
    }

    // =========================================================================
    // Event handlers
    // =========================================================================

    fn transition(&self, state: ConnectionState) -> Vec<SessionAction> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == state {
            return Vec::new();
        }
        log::debug!("[SyncSession] {:?} -> {:?}", inner.state, state);
        inner.state = state;
        vec![SessionAction::Emit(SyncEvent::StateChanged { state })]
    }

    fn handle_opened(&self) -> Vec<SessionAction> {
        let mut inner = self.inner.lock().unwrap();
        inner.state = ConnectionState::Open;

        let mut actions = vec![SessionAction::Emit(SyncEvent::StateChanged {
            state: ConnectionState::Open,
        })];
        actions.extend(Self::drain(&mut inner));
        actions
    }

    fn handle_message(&self, text: &str) -> Vec<SessionAction> {
        let message = match WireMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("[SyncSession] Ignoring malformed message: {}", e);
                return Vec::new();
            }
        };

        match message {
            WireMessage::Patch(patch) => match self.engine.patch(&patch) {
                Ok(report) => {
                    if !report.skipped.is_empty() {
                        log::warn!(
                            "[SyncSession] {} edits for {} did not match the shadow",
                            report.skipped.len(),
                            patch.id
                        );
                    }
                    vec![SessionAction::Emit(SyncEvent::DocumentSynced {
                        document: report.document,
                    })]
                }
                Err(e) => {
                    log::error!("[SyncSession] Failed to patch {}: {}", patch.id, e);
                    vec![SessionAction::Emit(SyncEvent::Error {
                        message: e.to_string(),
                    })]
                }
            },
            WireMessage::Add(add) => self.handle_remote_add(add),
        }
    }

    /// A peer announced a document. Unknown ids are registered with the
    /// announced content; known ids are left alone.
    fn handle_remote_add(&self, add: AddMessage) -> Vec<SessionAction> {
        match self.engine.get_document(&add.id) {
            Ok(_) => {
                log::debug!("[SyncSession] Ignoring add for known document {}", add.id);
                Vec::new()
            }
            Err(SyncError::NotFound { .. }) => {
                let document = Document {
                    id: add.id,
                    content: add.content,
                };
                match self.engine.add_document(&document, &self.client_id) {
                    Ok(()) => vec![SessionAction::Emit(SyncEvent::DocumentSynced { document })],
                    Err(e) => vec![SessionAction::Emit(SyncEvent::Error {
                        message: e.to_string(),
                    })],
                }
            }
            Err(e) => vec![SessionAction::Emit(SyncEvent::Error {
                message: e.to_string(),
            })],
        }
    }

    // =========================================================================
    // Queue
    // =========================================================================

    fn dispatch(inner: &mut Inner, message: WireMessage) -> Vec<SessionAction> {
        if inner.state == ConnectionState::Open {
            return vec![SessionAction::Send(message)];
        }
        log::debug!(
            "[SyncSession] Queued message for {} ({:?})",
            message.document_id(),
            inner.state
        );
        inner.queue.push_back(message);
        Vec::new()
    }

    fn drain(inner: &mut Inner) -> Vec<SessionAction> {
        let queued: Vec<WireMessage> = inner.queue.drain(..).collect();
        if !queued.is_empty() {
            log::debug!("[SyncSession] Draining {} queued messages", queued.len());
        }
        coalesce(queued)
            .into_iter()
            .map(SessionAction::Send)
            .collect()
    }
}

/// Merge patches for the same (client, document) pair into the first such
/// message, concatenating edit lists in order. Other messages keep their
/// position.
fn coalesce(messages: Vec<WireMessage>) -> Vec<WireMessage> {
    let mut out: Vec<WireMessage> = Vec::with_capacity(messages.len());
    for message in messages {
        let patch = match message {
            WireMessage::Patch(patch) => patch,
            other => {
                out.push(other);
                continue;
            }
        };

        let existing = out.iter().position(|queued| {
            matches!(queued, WireMessage::Patch(first)
                if first.id == patch.id && first.client_id == patch.client_id)
        });
        match existing {
            Some(index) => {
                if let WireMessage::Patch(first) = &mut out[index] {
                    first.edits.extend(patch.edits);
                }
            }
            None => out.push(WireMessage::Patch(patch)),
        }
    }
    out
}

impl<S: Strategy> std::fmt::Debug for SyncSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("SyncSession")
            .field("client_id", &self.client_id)
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .finish()
    }
}
