//! # Error Types
//!
//! Error handling for the session layer.
//!
//! This module defines all error variants that can occur during session
//! operations, from transport failures to malformed inbound frames.
//!
//! ## Error Categories
//! - **Transport errors**: connect/send/accept failures — surfaced through
//!   error events, never fatal to the process
//! - **Protocol errors**: malformed frames, decrypt/deserialize failures on
//!   inbound messages
//! - **Configuration errors**: invalid construction parameters — fatal at
//!   construction time
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Router-related error messages
    pub const ERR_ROUTER_WRITE_LOCK: &str = "Failed to acquire write lock on command router";
    pub const ERR_ROUTER_READ_LOCK: &str = "Failed to acquire read lock on command router";

    /// Frame validation errors
    pub const ERR_TRUNCATED_FRAME: &str = "Frame body shorter than declared length";
}

/// Primary error type for all session-layer operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown frame kind: {0:#04x}")]
    InvalidFrameKind(u8),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using SessionError
pub type Result<T> = std::result::Result<T, SessionError>;
