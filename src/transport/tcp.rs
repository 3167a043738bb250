//! TCP implementation of the transport contract.
//!
//! Each connection owns two tasks: a reader pushing raw chunks into the
//! event channel and a writer draining an unbounded outbound queue, so
//! `send` never blocks the caller. Teardown is guarded by map removal:
//! whichever path removes the connection entry first is the one that emits
//! the terminal event, so a failing connection produces exactly one of
//! `Error` or `Disconnected`. The reader is gated until the connection is
//! registered and, on the server side, its `Accepted` event queued, so a
//! connection's `Received` events never precede its `Accepted`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SessionError};
use crate::transport::{ConnectionId, Transport, TransportEvent};

struct ConnHandle {
    writer: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
}

struct Shared {
    events: mpsc::Sender<TransportEvent>,
    conns: Mutex<HashMap<ConnectionId, ConnHandle>>,
    next_id: AtomicU64,
    read_buffer: usize,
}

impl Shared {
    /// Remove the entry and report a clean close, if still present.
    async fn closed(&self, id: &str) {
        let removed = self.conns.lock().await.remove(id);
        if removed.is_some() {
            debug!(id, "Connection closed");
            let _ = self
                .events
                .send(TransportEvent::Disconnected(id.to_string()))
                .await;
        }
    }

    /// Remove the entry and report a failure, if still present.
    async fn failed(&self, id: &str, err: SessionError) {
        let removed = self.conns.lock().await.remove(id);
        if removed.is_some() {
            debug!(id, error = %err, "Connection failed");
            let _ = self
                .events
                .send(TransportEvent::Error(id.to_string(), err))
                .await;
        }
    }
}

/// Stream transport over tokio TCP, usable in client and server roles.
#[derive(Clone)]
pub struct TcpTransport {
    shared: Arc<Shared>,
}

impl TcpTransport {
    /// Create a transport pushing events into `events`.
    ///
    /// `read_buffer` sizes the per-connection read buffer.
    pub fn new(events: mpsc::Sender<TransportEvent>, read_buffer: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                events,
                conns: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                read_buffer,
            }),
        }
    }

    /// Bind a listener and start accepting connections in the background.
    ///
    /// Returns the bound local address (useful with an ephemeral port).
    /// Connections beyond `max_connections` are refused at accept time.
    pub async fn listen(&self, addr: &str, max_connections: usize) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(address = %local, "Listening");

        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let live = shared.conns.lock().await.len();
                        if live >= max_connections {
                            warn!(peer = %peer, live, "Connection refused: at capacity");
                            continue;
                        }
                        let (id, gate) = Shared::install(&shared, stream, peer).await;
                        let _ = shared.events.send(TransportEvent::Accepted(id)).await;
                        let _ = gate.send(());
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        });

        Ok(local)
    }
}

impl Shared {
    /// Wire up reader and writer tasks for an established stream.
    ///
    /// The reader stays parked until the returned gate fires, which lets
    /// the caller queue its own bookkeeping (the `Accepted` event) ahead
    /// of the connection's first `Received`.
    async fn install(
        shared: &Arc<Shared>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> (ConnectionId, oneshot::Sender<()>) {
        let seq = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let id: ConnectionId = format!("{peer}#{seq}");

        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = oneshot::channel();

        let reader = tokio::spawn(Shared::read_loop(
            shared.clone(),
            id.clone(),
            read_half,
            gate_rx,
        ));
        tokio::spawn(Shared::write_loop(shared.clone(), id.clone(), write_half, writer_rx));

        shared.conns.lock().await.insert(
            id.clone(),
            ConnHandle {
                writer: writer_tx,
                reader,
            },
        );
        (id, gate_tx)
    }

    async fn read_loop(
        shared: Arc<Shared>,
        id: ConnectionId,
        mut half: OwnedReadHalf,
        gate: oneshot::Receiver<()>,
    ) {
        if gate.await.is_err() {
            return;
        }
        let mut buf = vec![0u8; shared.read_buffer];
        loop {
            match half.read(&mut buf).await {
                Ok(0) => {
                    shared.closed(&id).await;
                    return;
                }
                Ok(n) => {
                    let _ = shared
                        .events
                        .send(TransportEvent::Received(id.clone(), buf[..n].to_vec()))
                        .await;
                }
                Err(e) => {
                    shared.failed(&id, SessionError::Io(e)).await;
                    return;
                }
            }
        }
    }

    async fn write_loop(
        shared: Arc<Shared>,
        id: ConnectionId,
        mut half: OwnedWriteHalf,
        mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = half.write_all(&bytes).await {
                shared.failed(&id, SessionError::Io(e)).await;
                return;
            }
        }
        // Outbound queue dropped: half-close so the peer sees EOF.
        let _ = half.shutdown().await;
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, addr: &str) -> Result<ConnectionId> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| SessionError::Transport(format!("connect {addr}: {e}")))?;
        let peer = stream.peer_addr()?;
        let (id, gate) = Shared::install(&self.shared, stream, peer).await;
        let _ = gate.send(());
        debug!(id, "Connected");
        Ok(id)
    }

    async fn send(&self, id: &str, bytes: Vec<u8>) {
        let conns = self.shared.conns.lock().await;
        if let Some(handle) = conns.get(id) {
            // Failure means the writer already tore down; the terminal
            // event is on its way.
            let _ = handle.writer.send(bytes);
        }
    }

    async fn disconnect(&self, id: &str) {
        let removed = self.shared.conns.lock().await.remove(id);
        if let Some(handle) = removed {
            handle.reader.abort();
            drop(handle.writer);
            let _ = self
                .shared
                .events
                .send(TransportEvent::Disconnected(id.to_string()))
                .await;
        }
    }

    async fn is_connected(&self, id: &str) -> bool {
        self.shared.conns.lock().await.contains_key(id)
    }
}
