//! Server connection lifecycle manager.
//!
//! Accepts connections, issues each one a fresh session key at accept
//! time, and routes decrypted envelopes through the command router. The
//! session key roster doubles as the online-connection roster, so
//! broadcast and status reporting read from one place.
//!
//! Unlike the client, the server is strict about inbound decode failures:
//! a connection whose traffic cannot be decrypted or deserialized is
//! disconnected, on the grounds that its key state is unrecoverable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, trace, warn};

use crate::config::{SessionConfig, TransportKind};
use crate::core::codec::FrameUnpacker;
use crate::core::envelope::Envelope;
use crate::core::frame::{Frame, FrameKind};
use crate::crypto::{self, SessionKey};
use crate::error::Result;
use crate::protocol::router::CommandRouter;
use crate::session::key_store::SessionKeyStore;
use crate::transport::tcp::TcpTransport;
use crate::transport::udp::UdpTransport;
use crate::transport::{ConnectionId, Transport, TransportEvent};
use crate::utils::metrics::SessionMetrics;

/// Capacity of the transport event channel.
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Capacity of the application event broadcast.
const BROADCAST_CAPACITY: usize = 1024;

/// Notifications the server surfaces to the embedding application.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A connection was accepted and its session key issued.
    Accepted(ConnectionId),
    /// An inbound envelope no registered module handled.
    Received(ConnectionId, Envelope),
    /// A connection failed.
    Error(ConnectionId, String),
    /// A connection closed.
    Disconnected(ConnectionId),
}

/// The concrete socket behind the transport contract; kept alongside the
/// trait object because only the concrete types can listen.
enum ServerSocket {
    Tcp(TcpTransport),
    Udp(UdpTransport),
}

struct ServerInner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    socket: ServerSocket,
    router: CommandRouter<ConnectionId>,
    keys: SessionKeyStore,
    events: broadcast::Sender<ServerEvent>,
    /// Reassembly state per connection; stream chunks split frames.
    unpackers: Mutex<HashMap<ConnectionId, FrameUnpacker>>,
    running: AtomicBool,
    metrics: SessionMetrics,
}

/// Server role of the session layer.
pub struct SessionServer {
    inner: Arc<ServerInner>,
}

impl SessionServer {
    /// Build a server over the transport selected by the configuration.
    ///
    /// Fails on hard configuration errors; advisory warnings are logged.
    /// Call [`start`](Self::start) to bind and begin accepting.
    pub fn new(mut config: SessionConfig) -> Result<Self> {
        config.normalize();
        crate::service::check_config(&config)?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (transport, socket): (Arc<dyn Transport>, ServerSocket) = match config.transport.kind {
            TransportKind::Tcp => {
                let tcp = TcpTransport::new(events_tx, config.transport.buffer_size);
                (Arc::new(tcp.clone()), ServerSocket::Tcp(tcp))
            }
            TransportKind::Udp => {
                let udp = UdpTransport::new(events_tx, config.transport.buffer_size);
                (Arc::new(udp.clone()), ServerSocket::Udp(udp))
            }
        };

        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        let inner = Arc::new(ServerInner {
            config,
            transport,
            socket,
            router: CommandRouter::new(),
            keys: SessionKeyStore::default(),
            events,
            unpackers: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            metrics: SessionMetrics::new(),
        });

        ServerInner::spawn_event_loop(&inner, events_rx);
        ServerInner::spawn_status_task(&inner);
        Ok(Self { inner })
    }

    /// Bind the configured address and start accepting connections.
    ///
    /// Returns the bound local address (useful with an ephemeral port).
    pub async fn start(&self) -> Result<std::net::SocketAddr> {
        let addr = &self.inner.config.server.address;
        let max = self.inner.config.server.max_connections;
        let local = match &self.inner.socket {
            ServerSocket::Tcp(tcp) => tcp.listen(addr, max).await?,
            ServerSocket::Udp(udp) => udp.listen(addr, max).await?,
        };
        self.inner.running.store(true, Ordering::SeqCst);
        info!(address = %local, "Server started");
        Ok(local)
    }

    /// Stop serving: disconnect every connection, drop all session keys,
    /// and reset the traffic counters. Connections accepted afterwards are
    /// disconnected immediately.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        for id in self.inner.keys.list_ids().await {
            self.inner.transport.disconnect(&id).await;
        }
        self.inner.keys.clear().await;
        self.inner.unpackers.lock().await.clear();
        self.inner.metrics.reset();
        info!("Server stopped");
    }

    /// Subscribe to server events. Each subscriber sees every event.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    /// Send an envelope to one connection. Fire-and-forget; a no-op when
    /// the connection is gone.
    pub async fn send_to(&self, id: &str, envelope: &Envelope) {
        self.inner.send_to(id, envelope).await;
    }

    /// Send an envelope to every online connection, each under its own
    /// session key. Fan-out runs one task per target, so a slow or dead
    /// connection never delays the rest.
    pub async fn broadcast(&self, envelope: &Envelope) {
        for id in self.inner.keys.list_ids().await {
            let inner = self.inner.clone();
            let envelope = envelope.clone();
            tokio::spawn(async move {
                inner.send_to(&id, &envelope).await;
            });
        }
    }

    /// Forcibly disconnect one connection.
    pub async fn kick(&self, id: &str) {
        self.inner.transport.disconnect(id).await;
    }

    /// Snapshot of online connection ids.
    pub async fn online(&self) -> Vec<ConnectionId> {
        self.inner.keys.list_ids().await
    }

    /// Number of online connections.
    pub async fn online_count(&self) -> usize {
        self.inner.keys.len().await
    }

    /// Register a module handler for a main command. The handler receives
    /// the originating connection id; a returned envelope is sent back on
    /// that connection automatically.
    pub fn register_module<F>(&self, main_command: u8, handler: F) -> Result<()>
    where
        F: Fn(&ConnectionId, &Envelope) -> Option<Envelope> + Send + Sync + 'static,
    {
        self.inner.router.register(main_command, handler)
    }

    /// Remove every handler registered for a main command.
    pub fn unregister_module(&self, main_command: u8) -> Result<()> {
        self.inner.router.unregister(main_command)
    }

    /// Traffic counters for this server.
    pub fn metrics(&self) -> crate::utils::metrics::MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl ServerInner {
    fn encryption_enabled(&self) -> bool {
        self.config.transport.encryption_enabled
    }

    /// Issue a fresh key to a newly accepted connection and announce it.
    ///
    /// The key is stored unconditionally (the store is also the online
    /// roster); the KeyExchange frame only goes out when encryption is on.
    async fn on_accepted(&self, id: ConnectionId) {
        if !self.running.load(Ordering::SeqCst) {
            self.transport.disconnect(&id).await;
            return;
        }
        self.metrics.connection_established();

        let key = SessionKey::generate();
        self.keys.set(id.clone(), key.clone()).await;
        self.unpackers
            .lock()
            .await
            .insert(id.clone(), FrameUnpacker::new());

        if self.encryption_enabled() {
            match Self::key_exchange_frame(&key) {
                Ok(frame) => {
                    self.transport.send(&id, frame.to_bytes()).await;
                    debug!(id, "Session key issued");
                }
                Err(e) => {
                    warn!(id, error = %e, "Key issue failed, disconnecting");
                    self.drop_connection(&id).await;
                    return;
                }
            }
        }
        let _ = self.events.send(ServerEvent::Accepted(id));
    }

    /// Wrap a session key for the wire: serialized, then sealed under the
    /// bootstrap cipher so a fresh client can open it.
    fn key_exchange_frame(key: &SessionKey) -> Result<Frame> {
        let plain = bincode::serialize(key)?;
        let bootstrap = SessionKey::bootstrap();
        let sealed = crypto::encrypt(&plain, &bootstrap.key, &bootstrap.iv)?;
        Ok(Frame::key_exchange(sealed))
    }

    async fn on_receive(&self, id: &ConnectionId, chunk: &[u8]) {
        let frames = {
            let mut unpackers = self.unpackers.lock().await;
            let Some(unpacker) = unpackers.get_mut(id) else {
                return;
            };
            match unpacker.unpack(chunk) {
                Ok(frames) => frames,
                Err(e) => {
                    // Stream state is unrecoverable after a framing error.
                    warn!(id, error = %e, "Framing error, disconnecting");
                    drop(unpackers);
                    self.drop_connection(id).await;
                    return;
                }
            }
        };

        for frame in frames {
            match frame.kind {
                FrameKind::Heartbeat => {
                    trace!(id, "Heartbeat");
                    self.keys.touch(id).await;
                    self.transport.send(id, Frame::heartbeat().to_bytes()).await;
                }
                FrameKind::KeyExchange => {
                    // Key issuance is server-to-client only.
                    trace!(id, "Unexpected KeyExchange frame ignored");
                }
                FrameKind::Application => {
                    if !self.on_application(id, &frame.body).await {
                        self.drop_connection(id).await;
                        return;
                    }
                }
            }
        }
    }

    /// Process one application frame. Returns false when the connection
    /// should be dropped.
    async fn on_application(&self, id: &ConnectionId, body: &[u8]) -> bool {
        let plain = match self
            .keys
            .decrypt_for(id, body, self.encryption_enabled())
            .await
        {
            Ok(plain) => plain,
            Err(e) => {
                warn!(id, error = %e, "Undecryptable message, disconnecting");
                return false;
            }
        };

        let envelope = match Envelope::from_bytes(&plain) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(id, error = %e, "Undeserializable message, disconnecting");
                return false;
            }
        };
        self.metrics.packet_received();

        match self.router.dispatch(id, &envelope) {
            Ok(outcome) => {
                for reply in outcome.replies {
                    self.send_to(id, &reply).await;
                }
                if !outcome.handled {
                    let _ = self.events.send(ServerEvent::Received(id.clone(), envelope));
                }
            }
            Err(e) => warn!(id, error = %e, "Router dispatch failed"),
        }
        true
    }

    async fn send_to(&self, id: &str, envelope: &Envelope) {
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(id, error = %e, "Dropped outbound envelope: serialization failed");
                return;
            }
        };
        let body = match self
            .keys
            .encrypt_for(id, &bytes, self.encryption_enabled())
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!(id, error = %e, "Dropped outbound envelope: encryption failed");
                return;
            }
        };
        self.transport
            .send(id, Frame::application(body).to_bytes())
            .await;
        self.metrics.packet_sent();
    }

    /// Tear down transport and session state for a connection.
    async fn drop_connection(&self, id: &str) {
        self.transport.disconnect(id).await;
        self.forget(id).await;
    }

    /// Drop session state only (the transport side is already gone).
    async fn forget(&self, id: &str) {
        self.keys.delete(id).await;
        self.unpackers.lock().await.remove(id);
    }

    fn spawn_event_loop(inner: &Arc<Self>, mut events_rx: mpsc::Receiver<TransportEvent>) {
        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match event {
                    TransportEvent::Accepted(id) => inner.on_accepted(id).await,
                    TransportEvent::Received(id, chunk) => inner.on_receive(&id, &chunk).await,
                    TransportEvent::Error(id, e) => {
                        inner.forget(&id).await;
                        let _ = inner.events.send(ServerEvent::Error(id, e.to_string()));
                    }
                    TransportEvent::Disconnected(id) => {
                        inner.forget(&id).await;
                        let _ = inner.events.send(ServerEvent::Disconnected(id));
                    }
                }
            }
        });
    }

    /// Periodic status line with the online count and traffic counters.
    fn spawn_status_task(inner: &Arc<Self>) {
        let weak = Arc::downgrade(inner);
        let interval = inner.config.server.status_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.running.load(Ordering::SeqCst) {
                    let online = inner.keys.len().await;
                    inner.metrics.log_status(online);
                }
            }
        });
    }
}
