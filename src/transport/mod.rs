//! # Transport Boundary
//!
//! The session layer does not own sockets. It depends on a narrow transport
//! contract: connect, fire-and-forget send, disconnect, a connectedness
//! probe, and a stream of [`TransportEvent`]s delivered over a channel.
//!
//! Events for one connection arrive in order; events for different
//! connections are unordered relative to each other. Exactly one of
//! `Error` or `Disconnected` is emitted when a connection tears down.
//!
//! [`tcp::TcpTransport`] and [`udp::UdpTransport`] implement the contract
//! with tokio; anything honoring the same trait can be plugged in instead.

pub mod tcp;
pub mod udp;

use async_trait::async_trait;

use crate::error::{Result, SessionError};

/// Opaque identifier for one transport-level connection.
pub type ConnectionId = String;

/// Notifications pushed by a transport to its owner.
#[derive(Debug)]
pub enum TransportEvent {
    /// A new inbound connection was accepted (server side only).
    Accepted(ConnectionId),
    /// Raw bytes arrived on a connection. Chunk boundaries are arbitrary.
    Received(ConnectionId, Vec<u8>),
    /// The connection failed; it is already torn down.
    Error(ConnectionId, SessionError),
    /// The connection closed without error.
    Disconnected(ConnectionId),
}

/// Contract the session layer requires from a transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open an outbound connection, returning its id.
    async fn connect(&self, addr: &str) -> Result<ConnectionId>;

    /// Queue bytes for delivery. Fire-and-forget: failures surface as
    /// [`TransportEvent::Error`], never as a return value.
    async fn send(&self, id: &str, bytes: Vec<u8>);

    /// Tear down a connection. Emits `Disconnected` if it was live.
    async fn disconnect(&self, id: &str);

    /// Whether the connection is currently live.
    async fn is_connected(&self, id: &str) -> bool;
}
