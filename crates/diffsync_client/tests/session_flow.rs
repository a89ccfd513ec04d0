//! Driver tests over an in-memory transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use diffsync_client::{
    ConnectionState, SyncClient, SyncClientConfig, SyncEvent, SyncEventHandler, SyncTransport,
    TransportConnector, TransportError, WsMessage,
};
use diffsync_core::{Content, Document, Edit, PatchMessage, Strategy, SyncEngine, TextStrategy, WireMessage};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Server end of one mock connection.
struct MockPeer {
    to_client: UnboundedSender<WsMessage>,
    from_client: UnboundedReceiver<String>,
}

impl MockPeer {
    async fn next_message(&mut self) -> WireMessage {
        let text = self.from_client.recv().await.expect("client hung up");
        WireMessage::from_json(&text).unwrap()
    }

    fn send(&self, message: &WireMessage) {
        self.to_client
            .send(WsMessage::Text(message.to_json().unwrap()))
            .unwrap();
    }
}

struct MockTransport {
    incoming: UnboundedReceiver<WsMessage>,
    outgoing: UnboundedSender<String>,
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::SendFailed("peer gone".to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<WsMessage, TransportError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct MockConnector {
    peers: UnboundedSender<MockPeer>,
    failures: AtomicU32,
}

#[async_trait]
impl TransportConnector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, _url: &str) -> Result<MockTransport, TransportError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::ConnectionFailed("refused".to_string()));
        }

        let (to_client, incoming) = unbounded_channel();
        let (outgoing, from_client) = unbounded_channel();
        self.peers
            .send(MockPeer {
                to_client,
                from_client,
            })
            .map_err(|_| TransportError::ConnectionFailed("no listener".to_string()))?;
        Ok(MockTransport { incoming, outgoing })
    }
}

type Client = SyncClient<TextStrategy, MockConnector>;

fn setup(failures: u32) -> (Client, UnboundedReceiver<MockPeer>, UnboundedReceiver<SyncEvent>) {
    let (peers_tx, peers_rx) = unbounded_channel();
    let (events_tx, events_rx) = unbounded_channel();
    let handler: Arc<dyn SyncEventHandler> = Arc::new(move |event: SyncEvent| {
        let _ = events_tx.send(event);
    });

    let client = SyncClient::new(
        SyncClientConfig::new("ws://sync.test/ds").with_client_id("c1"),
        Arc::new(SyncEngine::new(TextStrategy::new())),
        MockConnector {
            peers: peers_tx,
            failures: AtomicU32::new(failures),
        },
        handler,
    )
    .unwrap();
    (client, peers_rx, events_rx)
}

async fn next_synced(events: &mut UnboundedReceiver<SyncEvent>) -> Document {
    loop {
        match events.recv().await.expect("handler dropped") {
            SyncEvent::DocumentSynced { document } => return document,
            _ => continue,
        }
    }
}

fn server_patch(cv: i64, sv: i64, from: &str, to: &str) -> WireMessage {
    let diffs = TextStrategy::new()
        .diff(&Content::from(from), &Content::from(to))
        .unwrap();
    WireMessage::Patch(PatchMessage {
        id: "d1".to_string(),
        client_id: "c1".to_string(),
        edits: vec![Edit::new(cv, sv, diffs)],
    })
}

#[tokio::test(start_paused = true)]
async fn test_queued_work_is_coalesced_on_open() {
    let (client, mut peers, mut events) = setup(0);

    client.add_document(&Document::new("d1", "Hello")).unwrap();
    client.sync(&Document::new("d1", "Hello World")).unwrap();
    client.sync(&Document::new("d1", "Hello World!")).unwrap();
    assert_eq!(client.session().queued(), 3);

    let driver = async {
        let mut peer = peers.recv().await.unwrap();

        let WireMessage::Add(add) = peer.next_message().await else {
            panic!("expected add first");
        };
        assert_eq!(add.content, Content::from("Hello"));

        let WireMessage::Patch(patch) = peer.next_message().await else {
            panic!("expected one coalesced patch");
        };
        let versions: Vec<i64> = patch.edits.iter().map(|e| e.client_version).collect();
        assert_eq!(versions, vec![0, 0, 1]);

        // Server absorbed both client edits and answers with its own.
        peer.send(&server_patch(2, 0, "Hello World!", "Hello World!?"));
        let document = next_synced(&mut events).await;
        assert_eq!(document.content, Content::from("Hello World!?"));
        assert!(peer.from_client.try_recv().is_err());

        client.disconnect();
    };

    tokio::join!(client.run_persistent(), driver);
    assert!(client.session().engine().pending_edits("d1").unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_open_connection_sends_immediately() {
    let (client, mut peers, _events) = setup(0);

    let driver = async {
        let mut peer = peers.recv().await.unwrap();
        client.add_document(&Document::new("d1", "a")).unwrap();
        assert!(matches!(peer.next_message().await, WireMessage::Add(_)));

        client.sync(&Document::new("d1", "ab")).unwrap();
        let WireMessage::Patch(patch) = peer.next_message().await else {
            panic!("expected patch");
        };
        assert_eq!(patch.edits.len(), 1);
        assert_eq!(client.session().queued(), 0);
        client.disconnect();
    };

    tokio::join!(client.run_persistent(), driver);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replays_unsent_work_in_order() {
    let (client, mut peers, mut events) = setup(1);

    let driver = async {
        let mut first = peers.recv().await.unwrap();
        client.add_document(&Document::new("d1", "base")).unwrap();
        assert!(matches!(first.next_message().await, WireMessage::Add(_)));

        // Server drops the connection; work done meanwhile must survive.
        drop(first);
        client.sync(&Document::new("d1", "base one")).unwrap();
        client.sync(&Document::new("d1", "base one two")).unwrap();

        let mut second = peers.recv().await.unwrap();
        let mut edits = Vec::new();
        while edits.len() < 3 {
            match second.next_message().await {
                WireMessage::Patch(patch) => edits.extend(patch.edits),
                other => panic!("unexpected {other:?}"),
            }
        }
        let versions: Vec<i64> = edits.iter().map(|e| e.client_version).collect();
        assert_eq!(versions, vec![0, 0, 1]);

        second.send(&server_patch(2, 0, "base one two", "base one two three"));
        let document = next_synced(&mut events).await;
        assert_eq!(document.content, Content::from("base one two three"));
        client.disconnect();
    };

    tokio::join!(client.run_persistent(), driver);

    let states: Vec<ConnectionState> = {
        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::StateChanged { state } = event {
                states.push(state);
            }
        }
        states
    };
    assert_eq!(states.last(), Some(&ConnectionState::Closed));
}
