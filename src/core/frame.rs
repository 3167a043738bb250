//! Wire-level frame type.
//!
//! A frame is the unit the codec produces and consumes: a one-byte kind tag,
//! a four-byte big-endian body length, and `length` bytes of body.
//!
//! ```text
//! [Kind(1)] [Length(4, BE)] [Body(N)]
//! ```
//!
//! The kind tag determines how the session layer interprets the body:
//! empty for `Heartbeat`, encrypted key material for `KeyExchange`, and
//! envelope bytes for `Application`.

use crate::config::MAX_FRAME_SIZE;
use crate::error::{Result, SessionError};

/// Size of the fixed frame header: kind tag + body length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Classifies what a frame body carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Empty-body liveness probe and its reply.
    Heartbeat,
    /// Bootstrap frame carrying a freshly generated session key.
    KeyExchange,
    /// An encrypted (or plaintext) serialized envelope.
    Application,
}

impl FrameKind {
    /// Wire tag for this kind.
    pub fn tag(self) -> u8 {
        match self {
            FrameKind::Heartbeat => 0x01,
            FrameKind::KeyExchange => 0x02,
            FrameKind::Application => 0x03,
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0x01 => Ok(FrameKind::Heartbeat),
            0x02 => Ok(FrameKind::KeyExchange),
            0x03 => Ok(FrameKind::Application),
            other => Err(SessionError::InvalidFrameKind(other)),
        }
    }
}

/// A discrete wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub body: Vec<u8>,
}

impl Frame {
    /// Build an empty heartbeat frame.
    pub fn heartbeat() -> Self {
        Self {
            kind: FrameKind::Heartbeat,
            body: Vec::new(),
        }
    }

    /// Build a key-exchange frame around already-encrypted key material.
    pub fn key_exchange(body: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::KeyExchange,
            body,
        }
    }

    /// Build an application frame around serialized envelope bytes.
    pub fn application(body: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Application,
            body,
        }
    }

    /// Serialize into the wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + self.body.len());
        out.push(self.kind.tag());
        out.extend_from_slice(&(self.body.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse a single frame from a contiguous buffer.
    ///
    /// Length is validated against `MAX_FRAME_SIZE` before any allocation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(SessionError::Protocol(
                crate::error::constants::ERR_TRUNCATED_FRAME.into(),
            ));
        }
        let kind = FrameKind::from_tag(bytes[0])?;
        let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(SessionError::OversizedFrame(len));
        }
        if bytes.len() < FRAME_HEADER_LEN + len {
            return Err(SessionError::Protocol(
                crate::error::constants::ERR_TRUNCATED_FRAME.into(),
            ));
        }
        Ok(Self {
            kind,
            body: bytes[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_is_empty() {
        let frame = Frame::heartbeat();
        assert_eq!(frame.kind, FrameKind::Heartbeat);
        assert!(frame.body.is_empty());
        assert_eq!(frame.to_bytes().len(), FRAME_HEADER_LEN);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn roundtrip_preserves_kind_and_body() {
        let frame = Frame::application(vec![0xAA; 300]);
        let decoded = Frame::from_bytes(&frame.to_bytes()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn unknown_tag_rejected() {
        let bytes = [0x7F, 0, 0, 0, 0];
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(SessionError::InvalidFrameKind(0x7F))
        ));
    }

    #[test]
    fn oversized_length_rejected_before_allocation() {
        let mut bytes = vec![0x03];
        bytes.extend_from_slice(&(u32::MAX).to_be_bytes());
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(SessionError::OversizedFrame(_))
        ));
    }
}
