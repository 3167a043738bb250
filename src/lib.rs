//! # Session Protocol
//!
//! Message-oriented session layer for TCP/UDP client-server applications.
//!
//! The crate turns a raw byte transport into a command-routed message
//! channel with per-connection encryption, liveness tracking, and
//! automatic reconnection:
//!
//! - **Framing**: a `[kind][length][body]` wire format carrying heartbeat,
//!   key-exchange, and application frames ([`core::frame`], [`core::codec`])
//! - **Messages**: envelopes pairing a two-level command classification
//!   with opaque JSON content ([`core::envelope`])
//! - **Encryption**: per-connection XChaCha20-Poly1305 session keys issued
//!   by the server at accept time ([`crypto`], [`session`])
//! - **Routing**: main-command dispatch to registered module handlers
//!   ([`protocol::router`])
//! - **Lifecycle**: a client manager with heartbeat and a reconnect state
//!   machine, and a server manager with a key roster and broadcast
//!   ([`service`])
//!
//! ## Quick Start
//!
//! ```no_run
//! use session_protocol::config::SessionConfig;
//! use session_protocol::core::envelope::Envelope;
//! use session_protocol::service::{SessionClient, SessionServer};
//!
//! # async fn run() -> session_protocol::error::Result<()> {
//! let server = SessionServer::new(SessionConfig::default())?;
//! server.register_module(0x01, |_conn, envelope| {
//!     Envelope::new(envelope.main_command, envelope.sub_command)
//!         .with_content(&"ack")
//!         .ok()
//! })?;
//! server.start().await?;
//!
//! let client = SessionClient::new(SessionConfig::default())?;
//! client.connect().await;
//! client.send_command(0x01, 0x00, &"hello").await;
//! # Ok(())
//! # }
//! ```
//!
//! Transports are pluggable behind [`transport::Transport`]; TCP and UDP
//! implementations ship in the crate.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod service;
pub mod session;
pub mod transport;
pub mod utils;

pub use crate::config::{SessionConfig, TransportKind};
pub use crate::core::envelope::Envelope;
pub use crate::core::frame::{Frame, FrameKind};
pub use crate::crypto::SessionKey;
pub use crate::error::{Result, SessionError};
pub use crate::protocol::router::CommandRouter;
pub use crate::service::{ClientEvent, ClientPhase, ServerEvent, SessionClient, SessionServer};
pub use crate::session::key_store::SessionKeyStore;
pub use crate::transport::{ConnectionId, Transport, TransportEvent};
