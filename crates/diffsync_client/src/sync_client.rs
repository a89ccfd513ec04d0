//! Reconnecting sync client driver.
//!
//! `SyncClient` owns the connection lifecycle around a [`SyncSession`]:
//!
//! - Connection via a [`TransportConnector`]
//! - Outgoing message channel (application calls → transport)
//! - Inbound message routing into the session
//! - Reconnection with exponential backoff
//! - Ping/keepalive
//!
//! Application calls (`add_document`, `sync`, `fetch`) and connection close
//! handling are serialized by one dispatch lock. Messages accepted while the
//! connection was open but not yet written when it drops go back to the
//! head of the session queue, so nothing is sent twice or out of order.
//!
//! # Usage
//!
//! ```ignore
//! let engine = Arc::new(SyncEngine::new(TextStrategy::new()));
//! let config = SyncClientConfig::load("sync.toml")?;
//! let client = SyncClient::new(config, engine, TokioConnector::new(), Arc::new(|event| {
//!     println!("{event:?}");
//! }))?;
//!
//! client.add_document(&Document::new("notes", "Hello"))?;
//! client.run_persistent().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use diffsync_core::{Document, Strategy, SyncEngine, WireMessage};
use tokio::sync::{Notify, mpsc};
use url::Url;

use crate::config::SyncClientConfig;
use crate::error::Result;
use crate::session::{IncomingEvent, SessionAction, SyncSession};
use crate::sync_types::{SyncEvent, SyncEventHandler};
use crate::transport::{SyncTransport, TransportConnector, TransportError, WsMessage};

/// Sync client driving one session over reconnecting transports.
pub struct SyncClient<S: Strategy, C: TransportConnector> {
    config: SyncClientConfig,
    url: Url,
    session: SyncSession<S>,
    connector: C,
    handler: Arc<dyn SyncEventHandler>,
    outgoing_tx: mpsc::UnboundedSender<WireMessage>,
    outgoing_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WireMessage>>,
    dispatch: Mutex<()>,
    running: AtomicBool,
    shutdown: Notify,
}

impl<S: Strategy, C: TransportConnector> SyncClient<S, C> {
    /// Create a client. Fails with `ClientError::Configuration` if the
    /// config is invalid.
    pub fn new(
        config: SyncClientConfig,
        engine: Arc<SyncEngine<S>>,
        connector: C,
        handler: Arc<dyn SyncEventHandler>,
    ) -> Result<Self> {
        let url = config.validate()?;
        let session = SyncSession::new(engine, config.client_id.clone());
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            url,
            session,
            connector,
            handler,
            outgoing_tx,
            outgoing_rx: tokio::sync::Mutex::new(outgoing_rx),
            dispatch: Mutex::new(()),
            running: AtomicBool::new(true),
            shutdown: Notify::new(),
        })
    }

    /// The session driven by this client.
    pub fn session(&self) -> &SyncSession<S> {
        &self.session
    }

    /// The WebSocket URL connections go to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether the client has not been asked to disconnect.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Application calls
    // =========================================================================

    /// Register a document and announce it to the peer.
    pub fn add_document(&self, document: &Document) -> Result<()> {
        self.with_session(|session| session.add_document(document))
    }

    /// Diff a changed document and send (or queue) the edits.
    pub fn sync(&self, document: &Document) -> Result<()> {
        self.with_session(|session| session.sync(document))
    }

    /// Sync the stored document, or flush the queue if anything is queued.
    pub fn fetch(&self, id: &str) -> Result<()> {
        self.with_session(|session| session.fetch(id))
    }

    /// The current document for `id`.
    pub fn get_document(&self, id: &str) -> Result<Document> {
        self.session.get_document(id)
    }

    /// Forget a document locally.
    pub fn remove_document(&self, id: &str) -> Result<()> {
        let _guard = self.dispatch.lock().unwrap();
        self.session.remove_document(id)
    }

    /// Stop the client. `run_persistent` returns after closing the current
    /// connection.
    pub fn disconnect(&self) {
        log::info!("[SyncClient] Disconnect requested");
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Run `f` under the dispatch lock, route its sends to the outgoing
    /// channel and deliver its events once the lock is released.
    fn with_session<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&SyncSession<S>) -> Result<Vec<SessionAction>>,
    {
        let events = {
            let _guard = self.dispatch.lock().unwrap();
            let actions = f(&self.session)?;
            self.route(actions)
        };
        self.emit(events);
        Ok(())
    }

    fn route(&self, actions: Vec<SessionAction>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        for action in actions {
            match action {
                SessionAction::Send(message) => {
                    if self.outgoing_tx.send(message).is_err() {
                        log::error!("[SyncClient] Outgoing channel closed");
                    }
                }
                SessionAction::Emit(event) => events.push(event),
            }
        }
        events
    }

    fn emit(&self, events: Vec<SyncEvent>) {
        for event in events {
            self.handler.on_event(event);
        }
    }

    fn process(&self, event: IncomingEvent) {
        let events = {
            let _guard = self.dispatch.lock().unwrap();
            let actions = self.session.process(event);
            self.route(actions)
        };
        self.emit(events);
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Run persistent sync with reconnection.
    ///
    /// The loop runs until [`SyncClient::disconnect`] is called, reconnection
    /// is disabled and the connection drops, or max reconnection attempts are
    /// exhausted.
    pub async fn run_persistent(&self) {
        let mut outgoing_rx = self.outgoing_rx.lock().await;
        let rc = &self.config.reconnect;
        let mut attempt = 0u32;

        while self.is_running() {
            if rc.max_attempts > 0 && attempt >= rc.max_attempts {
                log::info!("[SyncClient] Max reconnection attempts reached");
                break;
            }

            // Backoff delay on reconnection
            if attempt > 0 {
                let delay = rc.delay_secs(attempt);
                self.emit(vec![SyncEvent::Reconnecting { attempt }]);
                log::info!(
                    "[SyncClient] Reconnecting in {}s (attempt {}/{})",
                    delay,
                    attempt,
                    if rc.max_attempts == 0 {
                        "∞".to_string()
                    } else {
                        rc.max_attempts.to_string()
                    }
                );
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                    _ = self.shutdown.notified() => {}
                }
                if !self.is_running() {
                    break;
                }
            }

            self.process(IncomingEvent::Connecting);

            let mut transport = match self.connector.connect(self.url.as_str()).await {
                Ok(t) => {
                    log::info!("[SyncClient] Connected to {}", self.url);
                    attempt = 0; // Reset backoff on success
                    t
                }
                Err(e) => {
                    log::error!("[SyncClient] Connection failed: {}", e);
                    self.process(IncomingEvent::Error(e.to_string()));
                    if !rc.enabled {
                        break;
                    }
                    attempt += 1;
                    continue;
                }
            };

            self.process(IncomingEvent::Opened);

            let mut unsent = Vec::new();
            let result = self
                .run_connection(&mut transport, &mut outgoing_rx, &mut unsent)
                .await;
            let _ = transport.close().await;

            // Close handling: anything still in the channel was accepted while
            // open but never written.
            let events = {
                let _guard = self.dispatch.lock().unwrap();
                while let Ok(message) = outgoing_rx.try_recv() {
                    unsent.push(message);
                }
                if !unsent.is_empty() {
                    log::info!(
                        "[SyncClient] Requeueing {} unsent messages",
                        unsent.len()
                    );
                }
                self.session.requeue_front(unsent);

                let event = match result {
                    Ok(()) => IncomingEvent::Closed,
                    Err(e) => {
                        log::error!("[SyncClient] Session error: {}", e);
                        IncomingEvent::Error(e.to_string())
                    }
                };
                let actions = self.session.process(event);
                self.route(actions)
            };
            self.emit(events);

            if self.is_running() {
                if !rc.enabled {
                    log::info!("[SyncClient] Reconnection disabled");
                    break;
                }
                attempt += 1;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        log::info!("[SyncClient] Sync loop exited");
    }

    /// Run the message loop of one open connection.
    ///
    /// Returns `Ok(())` on graceful close or disconnect, `Err` on transport
    /// errors. A message whose write failed is pushed to `unsent`.
    async fn run_connection(
        &self,
        transport: &mut C::Transport,
        outgoing_rx: &mut mpsc::UnboundedReceiver<WireMessage>,
        unsent: &mut Vec<WireMessage>,
    ) -> std::result::Result<(), TransportError> {
        let mut ping_interval =
            tokio::time::interval(Duration::from_secs(self.config.ping_interval_secs));
        ping_interval.tick().await; // Consume first immediate tick

        loop {
            if !self.is_running() {
                return Ok(());
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    return Ok(());
                }
                msg = transport.recv() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.process(IncomingEvent::Message(text));
                        }
                        Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data) {
                            Ok(text) => self.process(IncomingEvent::Message(text)),
                            Err(_) => log::debug!("[SyncClient] Ignoring non-UTF-8 binary message"),
                        },
                        Some(Ok(WsMessage::Close)) | None => {
                            log::info!("[SyncClient] Connection closed by server");
                            return Ok(());
                        }
                        Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {} // keepalive
                        Some(Err(e)) => {
                            log::error!("[SyncClient] WebSocket error: {}", e);
                            return Err(e);
                        }
                    }
                }
                outgoing = outgoing_rx.recv() => {
                    let Some(message) = outgoing else {
                        return Err(TransportError::Closed);
                    };
                    let text = match message.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            log::error!(
                                "[SyncClient] Failed to encode message for {}: {}",
                                message.document_id(),
                                e
                            );
                            continue;
                        }
                    };
                    if let Err(e) = transport.send_text(text).await {
                        unsent.push(message);
                        return Err(e);
                    }
                }
                _ = ping_interval.tick() => {
                    transport.send_ping().await?;
                }
            }
        }
    }
}

impl<S: Strategy, C: TransportConnector> std::fmt::Debug for SyncClient<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("url", &self.url.as_str())
            .field("session", &self.session)
            .field("running", &self.is_running())
            .finish()
    }
}
