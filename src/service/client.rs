//! Client connection lifecycle manager.
//!
//! Owns one outbound connection: connect, encryption bootstrap, heartbeat
//! emission, receive loop, and the reconnect state machine.
//!
//! ## State machine
//! ```text
//! Disconnected -> Connecting -> Connected -> Keyed -> Disconnected
//!                       \__________ Reconnecting __________/
//! ```
//! The connection is considered usable at the `Keyed` transition — when the
//! server's KeyExchange frame has been processed — not at raw socket
//! connect. With encryption disabled there is no KeyExchange and `Opened`
//! fires on connect instead.
//!
//! ## Failure policy
//! Every error or disconnection resets the active session key (a key never
//! survives a torn-down connection) and schedules exactly one reconnect.
//! Reconnection is an explicit state machine driven by a timer task, not a
//! blocking wait inside a callback: attempts past the configured maximum
//! reset the counter and stop silently until a manual `connect()`.
//!
//! Inbound decode failures are swallowed and the message dropped; the
//! client deliberately prioritizes availability over strict correctness,
//! so callers only ever observe missing messages, not per-message errors.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::{SessionConfig, TransportKind};
use crate::core::codec::FrameUnpacker;
use crate::core::envelope::Envelope;
use crate::core::frame::{Frame, FrameKind};
use crate::crypto::{self, SessionKey};
use crate::error::Result;
use crate::protocol::router::CommandRouter;
use crate::transport::tcp::TcpTransport;
use crate::transport::udp::UdpTransport;
use crate::transport::{ConnectionId, Transport, TransportEvent};
use crate::utils::metrics::SessionMetrics;
use crate::utils::timeout::{self, with_timeout};

/// Capacity of the transport event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the application event broadcast.
const BROADCAST_CAPACITY: usize = 256;

/// Lifecycle phase of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Disconnected,
    Connecting,
    /// Socket is up but no session key has arrived yet.
    Connected,
    /// KeyExchange processed; the connection is usable.
    Keyed,
    Reconnecting,
}

/// Notifications the client surfaces to the embedding application.
///
/// Delivered over a broadcast channel: every subscriber sees every event,
/// with no cross-subscriber ordering guarantee.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The connection became usable (session key stored, or connect
    /// completed with encryption disabled).
    Opened,
    /// A reconnect attempt is about to run.
    Reconnecting { attempt: u32 },
    /// The connection closed.
    Disconnected,
    /// A transport-level failure. Never fatal to the process.
    Error(String),
    /// An inbound envelope no registered module handled.
    Received(Envelope),
    /// Measured heartbeat round-trip delay.
    HeartbeatDelay(Duration),
}

/// Cloneable back-reference handed to module handlers so they can send
/// through the owning client without owning it.
#[derive(Clone)]
pub struct ClientHandle {
    inner: Weak<ClientInner>,
}

impl ClientHandle {
    /// Queue an envelope for sending. Fire-and-forget.
    pub fn send(&self, envelope: Envelope) {
        if let Some(inner) = self.inner.upgrade() {
            tokio::spawn(async move {
                inner.send(&envelope).await;
            });
        }
    }
}

struct ClientState {
    conn: Option<ConnectionId>,
    phase: ClientPhase,
    key: Option<SessionKey>,
    attempts: u32,
    reconnect_pending: bool,
    /// Set by `close()`; suppresses reconnection until the next `connect()`.
    closed: bool,
    unpacker: FrameUnpacker,
}

struct ClientInner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    router: CommandRouter<ClientHandle>,
    events: broadcast::Sender<ClientEvent>,
    state: Mutex<ClientState>,
    /// Timestamp of the most recent heartbeat send, for delay measurement.
    last_heartbeat: Mutex<Option<Instant>>,
    metrics: SessionMetrics,
}

/// Client role of the session layer.
pub struct SessionClient {
    inner: Arc<ClientInner>,
}

impl SessionClient {
    /// Build a client over the transport selected by the configuration.
    ///
    /// Fails on hard configuration errors; advisory warnings are logged.
    pub fn new(mut config: SessionConfig) -> Result<Self> {
        config.normalize();
        crate::service::check_config(&config)?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let transport: Arc<dyn Transport> = match config.transport.kind {
            TransportKind::Tcp => {
                Arc::new(TcpTransport::new(events_tx, config.transport.buffer_size))
            }
            TransportKind::Udp => {
                Arc::new(UdpTransport::new(events_tx, config.transport.buffer_size))
            }
        };
        Ok(Self::with_transport(config, transport, events_rx))
    }

    /// Build a client over an externally provided transport.
    ///
    /// The transport must push its events into the paired receiver. This is
    /// the seam for alternative transports and for tests.
    pub fn with_transport(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        events_rx: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        let inner = Arc::new(ClientInner {
            config,
            transport,
            router: CommandRouter::new(),
            events,
            state: Mutex::new(ClientState {
                conn: None,
                phase: ClientPhase::Disconnected,
                key: None,
                attempts: 0,
                reconnect_pending: false,
                closed: false,
                unpacker: FrameUnpacker::new(),
            }),
            last_heartbeat: Mutex::new(None),
            metrics: SessionMetrics::new(),
        });

        ClientInner::spawn_event_loop(&inner, events_rx);
        if inner.config.client.heartbeat_enabled {
            ClientInner::spawn_heartbeat(&inner);
        }

        Self { inner }
    }

    /// Subscribe to client events. Each subscriber sees every event.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> ClientPhase {
        self.inner.state.lock().await.phase
    }

    /// Whether the socket is currently up (not necessarily keyed).
    pub async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    /// Open the connection. No-op when already connected; a failure raises
    /// an error event and hands over to the reconnect state machine.
    pub async fn connect(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.closed = false;
        }
        self.inner.clone().connect().await;
    }

    /// Close the connection without triggering reconnection.
    pub async fn close(&self) {
        let conn = {
            let mut state = self.inner.state.lock().await;
            state.closed = true;
            state.conn.clone()
        };
        if let Some(id) = conn {
            self.inner.transport.disconnect(&id).await;
        }
    }

    /// Send an envelope. Fire-and-forget: serializes, encrypts under the
    /// active key when encryption is enabled, frames, and hands to the
    /// transport; silently no-ops when not connected.
    pub async fn send(&self, envelope: &Envelope) {
        self.inner.send(envelope).await;
    }

    /// Convenience: build and send an envelope with typed content.
    pub async fn send_command<T: serde::Serialize>(
        &self,
        main_command: u8,
        sub_command: u8,
        content: &T,
    ) {
        match Envelope::new(main_command, sub_command).with_content(content) {
            Ok(envelope) => self.send(&envelope).await,
            Err(e) => warn!(error = %e, "Dropped outbound message: content serialization failed"),
        }
    }

    /// Register a module handler for a main command. The handler receives
    /// a [`ClientHandle`] for sending back through this client; a returned
    /// envelope is sent automatically.
    pub fn register_module<F>(&self, main_command: u8, handler: F) -> Result<()>
    where
        F: Fn(&ClientHandle, &Envelope) -> Option<Envelope> + Send + Sync + 'static,
    {
        self.inner.router.register(main_command, handler)
    }

    /// Remove every handler registered for a main command.
    pub fn unregister_module(&self, main_command: u8) -> Result<()> {
        self.inner.router.unregister(main_command)
    }

    /// Traffic counters for this client.
    pub fn metrics(&self) -> crate::utils::metrics::MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

/// `connect` re-enters itself through the reconnect task; boxing names the
/// future so the spawned task stays `Send`.
fn connect_boxed(inner: Arc<ClientInner>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(inner.connect())
}

impl ClientInner {
    fn handle(self: &Arc<Self>) -> ClientHandle {
        ClientHandle {
            inner: Arc::downgrade(self),
        }
    }

    async fn is_connected(&self) -> bool {
        let conn = self.state.lock().await.conn.clone();
        match conn {
            Some(id) => self.transport.is_connected(&id).await,
            None => false,
        }
    }

    /// Issue one connect attempt. Retry belongs exclusively to
    /// `schedule_reconnect`.
    async fn connect(self: Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if state.conn.is_some() || state.closed {
                return;
            }
            state.phase = ClientPhase::Connecting;
        }

        let addr = self.config.client.address.clone();
        let attempt = with_timeout(
            self.transport.connect(&addr),
            self.config.client.connection_timeout,
        )
        .await;

        match attempt {
            Ok(id) => {
                {
                    // close() may have landed while the connect was in
                    // flight; honor it instead of adopting the socket.
                    let state = self.state.lock().await;
                    if state.closed {
                        drop(state);
                        self.transport.disconnect(&id).await;
                        return;
                    }
                }
                debug!(id, "Connected to server");
                self.metrics.connection_established();
                let opened = {
                    let mut state = self.state.lock().await;
                    state.conn = Some(id);
                    state.attempts = 0;
                    state.unpacker = FrameUnpacker::new();
                    if self.config.transport.encryption_enabled {
                        state.phase = ClientPhase::Connected;
                        false
                    } else {
                        // No KeyExchange will come; usable immediately.
                        state.phase = ClientPhase::Keyed;
                        true
                    }
                };
                if opened {
                    let _ = self.events.send(ClientEvent::Opened);
                }
            }
            Err(e) => {
                let _ = self
                    .events
                    .send(ClientEvent::Error(format!("connect failed: {e}")));
                self.schedule_reconnect().await;
            }
        }
    }

    /// Tear down connection state after a failure or disconnect and
    /// schedule exactly one reconnect.
    async fn lost(self: &Arc<Self>, event: ClientEvent) {
        let closed = {
            let mut state = self.state.lock().await;
            state.conn = None;
            // Never reuse a key across a torn-down connection.
            state.key = None;
            state.phase = ClientPhase::Disconnected;
            state.closed
        };
        let _ = self.events.send(event);
        if !closed {
            self.schedule_reconnect().await;
        }
    }

    /// The reconnect state machine: attempt counter + timer, driven by its
    /// own task rather than a blocking wait inside the event handler.
    async fn schedule_reconnect(self: &Arc<Self>) {
        let attempt = {
            let mut state = self.state.lock().await;
            if state.reconnect_pending {
                return;
            }
            state.attempts += 1;
            if state.attempts > self.config.client.max_reconnect_attempts {
                // Give up silently; the counter resets so a future manual
                // connect() starts a fresh cycle.
                debug!(
                    attempts = state.attempts - 1,
                    "Reconnect attempts exhausted"
                );
                state.attempts = 0;
                return;
            }
            state.reconnect_pending = true;
            state.phase = ClientPhase::Reconnecting;
            state.attempts
        };

        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.client.reconnect_delay).await;
            {
                let mut state = inner.state.lock().await;
                state.reconnect_pending = false;
                // close() during the delay cancels the pending attempt.
                if state.closed {
                    state.phase = ClientPhase::Disconnected;
                    return;
                }
            }
            let _ = inner.events.send(ClientEvent::Reconnecting { attempt });
            connect_boxed(inner).await;
        });
    }

    async fn send(&self, envelope: &Envelope) {
        let (conn, key) = {
            let state = self.state.lock().await;
            (state.conn.clone(), state.key.clone())
        };
        let Some(conn) = conn else {
            trace!("Send while disconnected, dropped");
            return;
        };

        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Dropped outbound envelope: serialization failed");
                return;
            }
        };

        let body = if self.config.transport.encryption_enabled {
            let key = key.unwrap_or_else(SessionKey::bootstrap);
            match crypto::encrypt(&bytes, &key.key, &key.iv) {
                Ok(ciphertext) => ciphertext,
                Err(e) => {
                    warn!(error = %e, "Dropped outbound envelope: encryption failed");
                    return;
                }
            }
        } else {
            bytes
        };

        self.transport
            .send(&conn, Frame::application(body).to_bytes())
            .await;
        self.metrics.packet_sent();
    }

    fn spawn_event_loop(inner: &Arc<Self>, mut events_rx: mpsc::Receiver<TransportEvent>) {
        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match event {
                    TransportEvent::Received(id, chunk) => {
                        inner.on_receive(&id, &chunk).await;
                    }
                    TransportEvent::Error(id, e) => {
                        if inner.owns(&id).await {
                            inner.lost(ClientEvent::Error(e.to_string())).await;
                        }
                    }
                    TransportEvent::Disconnected(id) => {
                        if inner.owns(&id).await {
                            inner.lost(ClientEvent::Disconnected).await;
                        }
                    }
                    // Client transports never accept.
                    TransportEvent::Accepted(_) => {}
                }
            }
        });
    }

    async fn owns(&self, id: &str) -> bool {
        self.state.lock().await.conn.as_deref() == Some(id)
    }

    /// Classify and process every frame completed by this chunk.
    async fn on_receive(self: &Arc<Self>, id: &str, chunk: &[u8]) {
        let frames = {
            let mut state = self.state.lock().await;
            if state.conn.as_deref() != Some(id) {
                return;
            }
            match state.unpacker.unpack(chunk) {
                Ok(frames) => frames,
                Err(e) => {
                    // Availability over strictness: drop and move on.
                    trace!(error = %e, "Inbound framing error, chunk dropped");
                    return;
                }
            }
        };

        for frame in frames {
            match frame.kind {
                FrameKind::Heartbeat => self.on_heartbeat_reply().await,
                FrameKind::KeyExchange => self.on_key_exchange(&frame.body).await,
                FrameKind::Application => self.on_application(&frame.body).await,
            }
        }
    }

    async fn on_heartbeat_reply(&self) {
        let sent = self.last_heartbeat.lock().await.take();
        if let Some(sent) = sent {
            let _ = self.events.send(ClientEvent::HeartbeatDelay(sent.elapsed()));
        }
    }

    /// Completes the handshake: the received key becomes the active
    /// encryption key and the connection is usable from here on.
    async fn on_key_exchange(&self, body: &[u8]) {
        let key = SessionKey::bootstrap();
        let opened = crypto::decrypt(body, &key.key, &key.iv)
            .ok()
            .and_then(|plain| bincode::deserialize::<SessionKey>(&plain).ok());

        match opened {
            Some(session_key) => {
                let mut state = self.state.lock().await;
                state.key = Some(session_key);
                state.phase = ClientPhase::Keyed;
                drop(state);
                debug!("Session key received, connection open");
                let _ = self.events.send(ClientEvent::Opened);
            }
            None => {
                trace!("Malformed KeyExchange frame dropped");
            }
        }
    }

    async fn on_application(self: &Arc<Self>, body: &[u8]) {
        let plain = if self.config.transport.encryption_enabled {
            let key = self.state.lock().await.key.clone();
            let Some(key) = key else {
                trace!("Application frame before key exchange, dropped");
                return;
            };
            match crypto::decrypt(body, &key.key, &key.iv) {
                Ok(plain) => plain,
                Err(_) => {
                    trace!("Undecryptable application frame dropped");
                    return;
                }
            }
        } else {
            body.to_vec()
        };

        let Ok(envelope) = Envelope::from_bytes(&plain) else {
            trace!("Undeserializable application frame dropped");
            return;
        };
        self.metrics.packet_received();

        let handle = self.handle();
        match self.router.dispatch(&handle, &envelope) {
            Ok(outcome) => {
                for reply in outcome.replies {
                    self.send(&reply).await;
                }
                if !outcome.handled {
                    let _ = self.events.send(ClientEvent::Received(envelope));
                }
            }
            Err(e) => warn!(error = %e, "Router dispatch failed"),
        }
    }

    /// Long-running liveness task. Lives as long as the client itself and
    /// self-throttles while disconnected; there is no explicit cancel.
    fn spawn_heartbeat(inner: &Arc<Self>) {
        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            loop {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.is_connected().await {
                    let interval = inner.config.client.heartbeat_interval;
                    let due = {
                        let last = inner.last_heartbeat.lock().await;
                        last.map_or(true, |at| at.elapsed() >= interval)
                    };
                    if due {
                        *inner.last_heartbeat.lock().await = Some(Instant::now());
                        let conn = inner.state.lock().await.conn.clone();
                        if let Some(conn) = conn {
                            inner
                                .transport
                                .send(&conn, Frame::heartbeat().to_bytes())
                                .await;
                            trace!("Heartbeat sent");
                        }
                    }
                    drop(inner);
                    tokio::time::sleep(interval).await;
                } else {
                    drop(inner);
                    tokio::time::sleep(timeout::DISCONNECTED_POLL).await;
                }
            }
        });
    }
}
