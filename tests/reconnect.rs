//! Reconnect state machine tests over a scripted in-memory transport.
//!
//! The mock transport counts connect attempts and can be switched between
//! accepting and refusing, which makes the attempt-counter behavior
//! directly observable without sockets or real delays.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use session_protocol::config::SessionConfig;
use session_protocol::error::{Result, SessionError};
use session_protocol::service::{ClientEvent, SessionClient};
use session_protocol::transport::{ConnectionId, Transport, TransportEvent};
use tokio::sync::{broadcast, mpsc, Mutex};

struct MockTransport {
    events: mpsc::Sender<TransportEvent>,
    connects: AtomicUsize,
    refuse: AtomicBool,
    live: Mutex<Option<ConnectionId>>,
}

impl MockTransport {
    fn new(events: mpsc::Sender<TransportEvent>, refuse: bool) -> Arc<Self> {
        Arc::new(Self {
            events,
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(refuse),
            live: Mutex::new(None),
        })
    }

    fn connect_attempts(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Tear down the live connection as if the peer dropped it.
    async fn drop_from_peer(&self) {
        let id = self.live.lock().await.take();
        if let Some(id) = id {
            let _ = self.events.send(TransportEvent::Disconnected(id)).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _addr: &str) -> Result<ConnectionId> {
        let attempt = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SessionError::Transport("refused".into()));
        }
        let id = format!("mock#{attempt}");
        *self.live.lock().await = Some(id.clone());
        Ok(id)
    }

    async fn send(&self, _id: &str, _bytes: Vec<u8>) {}

    async fn disconnect(&self, id: &str) {
        let mut live = self.live.lock().await;
        if live.as_deref() == Some(id) {
            *live = None;
            drop(live);
            let _ = self
                .events
                .send(TransportEvent::Disconnected(id.to_string()))
                .await;
        }
    }

    async fn is_connected(&self, id: &str) -> bool {
        self.live.lock().await.as_deref() == Some(id)
    }
}

fn test_config(max_attempts: u32) -> SessionConfig {
    SessionConfig::default_with_overrides(|c| {
        c.client.heartbeat_enabled = false;
        c.client.max_reconnect_attempts = max_attempts;
        c.client.reconnect_delay = Duration::from_millis(20);
        c.client.connection_timeout = Duration::from_secs(1);
        c.transport.encryption_enabled = false;
    })
}

async fn next_matching<F>(rx: &mut broadcast::Receiver<ClientEvent>, pred: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event within deadline")
}

#[tokio::test]
async fn failed_connect_retries_up_to_maximum_then_stops() {
    let (tx, rx) = mpsc::channel(64);
    let transport = MockTransport::new(tx, true);
    let client = SessionClient::with_transport(test_config(3), transport.clone(), rx);
    let mut events = client.subscribe();

    client.connect().await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    // One manual attempt plus exactly three scheduled retries.
    assert_eq!(transport.connect_attempts(), 4);

    let mut attempts_seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::Reconnecting { attempt } = event {
            attempts_seen.push(attempt);
        }
    }
    assert_eq!(attempts_seen, vec![1, 2, 3]);

    // Quiet after giving up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.connect_attempts(), 4);
}

#[tokio::test]
async fn giving_up_resets_counter_for_manual_reconnect() {
    let (tx, rx) = mpsc::channel(64);
    let transport = MockTransport::new(tx, true);
    let client = SessionClient::with_transport(test_config(2), transport.clone(), rx);

    client.connect().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(transport.connect_attempts(), 3);

    // The counter reset on give-up, so a manual connect runs a full cycle.
    client.connect().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(transport.connect_attempts(), 6);
}

#[tokio::test]
async fn successful_connect_resets_the_attempt_counter() {
    let (tx, rx) = mpsc::channel(64);
    let transport = MockTransport::new(tx, false);
    let client = SessionClient::with_transport(test_config(3), transport.clone(), rx);
    let mut events = client.subscribe();

    client.connect().await;
    next_matching(&mut events, |e| matches!(e, ClientEvent::Opened)).await;

    // Five consecutive peer drops, each past the nominal maximum of 3.
    // Every reconnect succeeds and resets the counter, so none gives up.
    for _ in 0..5 {
        transport.drop_from_peer().await;
        next_matching(&mut events, |e| matches!(e, ClientEvent::Opened)).await;
    }
    assert_eq!(transport.connect_attempts(), 6);
    assert!(client.is_connected().await);
}

#[tokio::test]
async fn explicit_close_does_not_reconnect() {
    let (tx, rx) = mpsc::channel(64);
    let transport = MockTransport::new(tx, false);
    let client = SessionClient::with_transport(test_config(3), transport.clone(), rx);
    let mut events = client.subscribe();

    client.connect().await;
    next_matching(&mut events, |e| matches!(e, ClientEvent::Opened)).await;

    client.close().await;
    next_matching(&mut events, |e| matches!(e, ClientEvent::Disconnected)).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.connect_attempts(), 1);
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn close_during_reconnect_delay_cancels_the_pending_attempt() {
    let (tx, rx) = mpsc::channel(64);
    let transport = MockTransport::new(tx, true);
    let mut config = test_config(3);
    config.client.reconnect_delay = Duration::from_millis(200);
    let client = SessionClient::with_transport(config, transport.clone(), rx);
    let mut events = client.subscribe();

    client.connect().await;
    assert_eq!(transport.connect_attempts(), 1);

    // Close while the first retry is still waiting out its delay. The
    // transport starts accepting, so a retry that fired anyway would
    // succeed and show up below.
    client.close().await;
    transport.set_refuse(false);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(transport.connect_attempts(), 1);
    assert!(!client.is_connected().await);
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ClientEvent::Reconnecting { .. }),
            "pending reconnect survived close()"
        );
    }
}

#[tokio::test]
async fn peer_drop_emits_disconnected_then_reconnects_once() {
    let (tx, rx) = mpsc::channel(64);
    let transport = MockTransport::new(tx, false);
    let client = SessionClient::with_transport(test_config(3), transport.clone(), rx);
    let mut events = client.subscribe();

    client.connect().await;
    next_matching(&mut events, |e| matches!(e, ClientEvent::Opened)).await;

    transport.drop_from_peer().await;
    next_matching(&mut events, |e| matches!(e, ClientEvent::Disconnected)).await;
    next_matching(&mut events, |e| {
        matches!(e, ClientEvent::Reconnecting { attempt: 1 })
    })
    .await;
    next_matching(&mut events, |e| matches!(e, ClientEvent::Opened)).await;

    assert_eq!(transport.connect_attempts(), 2);
}
