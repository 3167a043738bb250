//! Heartbeat cadence tests over a recording transport.
//!
//! Runs under a paused tokio clock, so timer-driven behavior is
//! deterministic: the interval between consecutive heartbeat sends can be
//! asserted exactly instead of within a tolerance.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use session_protocol::config::SessionConfig;
use session_protocol::error::Result;
use session_protocol::service::SessionClient;
use session_protocol::transport::{ConnectionId, Transport, TransportEvent};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

const HEARTBEAT_TAG: u8 = 0x01;

/// Always-accepting transport that timestamps every heartbeat frame.
struct RecordingTransport {
    #[allow(dead_code)]
    events: mpsc::Sender<TransportEvent>,
    connected: AtomicBool,
    heartbeats: Mutex<Vec<Instant>>,
}

impl RecordingTransport {
    fn new(events: mpsc::Sender<TransportEvent>) -> Arc<Self> {
        Arc::new(Self {
            events,
            connected: AtomicBool::new(false),
            heartbeats: Mutex::new(Vec::new()),
        })
    }

    async fn heartbeat_count(&self) -> usize {
        self.heartbeats.lock().await.len()
    }

    async fn heartbeat_times(&self) -> Vec<Instant> {
        self.heartbeats.lock().await.clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn connect(&self, _addr: &str) -> Result<ConnectionId> {
        self.connected.store(true, Ordering::SeqCst);
        Ok("recorder#0".to_string())
    }

    async fn send(&self, _id: &str, bytes: Vec<u8>) {
        if bytes.first() == Some(&HEARTBEAT_TAG) {
            self.heartbeats.lock().await.push(Instant::now());
        }
    }

    async fn disconnect(&self, _id: &str) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn is_connected(&self, _id: &str) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[tokio::test(start_paused = true)]
async fn heartbeats_fire_once_per_idle_interval() {
    let interval = Duration::from_millis(100);
    let (tx, rx) = mpsc::channel(64);
    let transport = RecordingTransport::new(tx);
    let config = SessionConfig::default_with_overrides(|c| {
        c.client.heartbeat_interval = interval;
        c.client.max_reconnect_attempts = 0;
        c.transport.encryption_enabled = false;
    });
    let client = SessionClient::with_transport(config, transport.clone(), rx);
    client.connect().await;

    // Virtual time: the loop below advances the clock until five
    // heartbeats have gone out, bounded so a stalled task fails the test.
    let deadline = Instant::now() + Duration::from_secs(30);
    while transport.heartbeat_count().await < 5 {
        assert!(Instant::now() < deadline, "heartbeats stopped firing");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Exactly one heartbeat per idle interval, no drift.
    let sent = transport.heartbeat_times().await;
    for pair in sent.windows(2) {
        assert_eq!(pair[1] - pair[0], interval);
    }
}

#[tokio::test(start_paused = true)]
async fn no_heartbeats_while_disconnected() {
    let interval = Duration::from_millis(100);
    let (tx, rx) = mpsc::channel(64);
    let transport = RecordingTransport::new(tx);
    let config = SessionConfig::default_with_overrides(|c| {
        c.client.heartbeat_interval = interval;
        c.client.max_reconnect_attempts = 0;
        c.transport.encryption_enabled = false;
    });
    let _client = SessionClient::with_transport(config, transport.clone(), rx);

    // Never connected: ten intervals of virtual time pass in silence.
    tokio::time::sleep(interval * 10).await;
    assert_eq!(transport.heartbeat_count().await, 0);
}
