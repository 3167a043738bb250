//! Datagram implementation of the transport contract.
//!
//! UDP has no connection state on the wire, so liveness is tracked by the
//! peer table alone: a server-side peer becomes "accepted" on its first
//! datagram and "disconnected" when the owner tears it down; there is no
//! EOF to observe. Frames still travel through the same codec — a datagram
//! simply delivers one or more complete frames in a single chunk.
//!
//! Datagram payloads are bounded by [`UDP_MAX_DATAGRAM`]; configuration
//! normalizes buffer sizes down to that cap.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::transport::{ConnectionId, Transport, TransportEvent};

/// Largest UDP payload the transport will send or buffer for receive.
pub const UDP_MAX_DATAGRAM: usize = 65507;

enum Peer {
    /// Seen by the server socket; datagrams go out via `send_to`.
    Inbound(SocketAddr),
    /// Opened by `connect`; owns a connected socket and its recv task.
    Outbound {
        socket: Arc<UdpSocket>,
        reader: JoinHandle<()>,
    },
}

struct Shared {
    events: mpsc::Sender<TransportEvent>,
    peers: Mutex<HashMap<ConnectionId, Peer>>,
    server: Mutex<Option<Arc<UdpSocket>>>,
    next_id: AtomicU64,
    buffer: usize,
}

/// Datagram transport over tokio UDP, usable in client and server roles.
#[derive(Clone)]
pub struct UdpTransport {
    shared: Arc<Shared>,
}

impl UdpTransport {
    /// Create a transport pushing events into `events`.
    ///
    /// `buffer` is capped to [`UDP_MAX_DATAGRAM`].
    pub fn new(events: mpsc::Sender<TransportEvent>, buffer: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                events,
                peers: Mutex::new(HashMap::new()),
                server: Mutex::new(None),
                next_id: AtomicU64::new(0),
                buffer: buffer.min(UDP_MAX_DATAGRAM),
            }),
        }
    }

    /// Bind the server socket and start receiving datagrams.
    ///
    /// A peer's first datagram emits `Accepted`; peers beyond
    /// `max_connections` are dropped at that point.
    pub async fn listen(&self, addr: &str, max_connections: usize) -> Result<SocketAddr> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local = socket.local_addr()?;
        info!(address = %local, "Listening (datagram)");
        *self.shared.server.lock().await = Some(socket.clone());

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; shared.buffer];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, peer)) => {
                        let id = format!("udp:{peer}");
                        let mut peers = shared.peers.lock().await;
                        if !peers.contains_key(&id) {
                            if peers.len() >= max_connections {
                                warn!(peer = %peer, "Datagram dropped: at capacity");
                                continue;
                            }
                            peers.insert(id.clone(), Peer::Inbound(peer));
                            drop(peers);
                            let _ = shared.events.send(TransportEvent::Accepted(id.clone())).await;
                        } else {
                            drop(peers);
                        }
                        let _ = shared
                            .events
                            .send(TransportEvent::Received(id, buf[..n].to_vec()))
                            .await;
                    }
                    Err(e) => {
                        // Socket-level failure; keep serving other peers.
                        warn!(error = %e, "Datagram receive error");
                    }
                }
            }
        });

        Ok(local)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn connect(&self, addr: &str) -> Result<ConnectionId> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(SessionError::Io)?;
        socket
            .connect(addr)
            .await
            .map_err(|e| SessionError::Transport(format!("connect {addr}: {e}")))?;
        let socket = Arc::new(socket);

        let seq = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let id: ConnectionId = format!("udp:{addr}#{seq}");

        let shared = self.shared.clone();
        let recv_socket = socket.clone();
        let recv_id = id.clone();
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; shared.buffer];
            loop {
                match recv_socket.recv(&mut buf).await {
                    Ok(n) => {
                        let _ = shared
                            .events
                            .send(TransportEvent::Received(recv_id.clone(), buf[..n].to_vec()))
                            .await;
                    }
                    Err(e) => {
                        let removed = shared.peers.lock().await.remove(&recv_id);
                        if removed.is_some() {
                            let _ = shared
                                .events
                                .send(TransportEvent::Error(recv_id.clone(), SessionError::Io(e)))
                                .await;
                        }
                        return;
                    }
                }
            }
        });

        self.shared
            .peers
            .lock()
            .await
            .insert(id.clone(), Peer::Outbound { socket, reader });
        debug!(id, "Datagram socket connected");
        Ok(id)
    }

    async fn send(&self, id: &str, bytes: Vec<u8>) {
        if bytes.len() > UDP_MAX_DATAGRAM {
            warn!(id, size = bytes.len(), "Datagram payload over maximum, dropped");
            return;
        }
        let peers = self.shared.peers.lock().await;
        match peers.get(id) {
            Some(Peer::Inbound(addr)) => {
                let server = self.shared.server.lock().await.clone();
                if let Some(socket) = server {
                    let _ = socket.send_to(&bytes, addr).await;
                }
            }
            Some(Peer::Outbound { socket, .. }) => {
                let _ = socket.send(&bytes).await;
            }
            None => {}
        }
    }

    async fn disconnect(&self, id: &str) {
        let removed = self.shared.peers.lock().await.remove(id);
        if let Some(peer) = removed {
            if let Peer::Outbound { reader, .. } = peer {
                reader.abort();
            }
            let _ = self
                .shared
                .events
                .send(TransportEvent::Disconnected(id.to_string()))
                .await;
        }
    }

    async fn is_connected(&self, id: &str) -> bool {
        self.shared.peers.lock().await.contains_key(id)
    }
}
