//! Tokio codec for framing the byte stream.
//!
//! `FrameCodec` is stateful across calls: partial frames left in the buffer
//! are completed by later deliveries, and a single delivery containing
//! several frames yields them all in order. Decoding is therefore
//! independent of how the transport happens to split the stream.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_FRAME_SIZE;
use crate::core::frame::{Frame, FrameKind, FRAME_HEADER_LEN};
use crate::error::SessionError;

/// Length-prefixed frame codec for `[kind][len][body]` wire layout.
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = SessionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, SessionError> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let kind = FrameKind::from_tag(src[0])?;
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;

        // Reject hostile length fields before reserving memory for them.
        if len > MAX_FRAME_SIZE {
            return Err(SessionError::OversizedFrame(len));
        }

        if src.len() < FRAME_HEADER_LEN + len {
            src.reserve(FRAME_HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let body = src.split_to(len).to_vec();
        Ok(Some(Frame { kind, body }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = SessionError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), SessionError> {
        if frame.body.len() > MAX_FRAME_SIZE {
            return Err(SessionError::OversizedFrame(frame.body.len()));
        }
        dst.reserve(FRAME_HEADER_LEN + frame.body.len());
        dst.put_u8(frame.kind.tag());
        dst.put_u32(frame.body.len() as u32);
        dst.put_slice(&frame.body);
        Ok(())
    }
}

/// Stateful unpacker for callers that receive raw byte chunks instead of
/// driving a `Framed` stream, e.g. datagram transports or event callbacks.
///
/// Feed chunks in arrival order; complete frames are returned as soon as the
/// buffered bytes allow.
#[derive(Default)]
pub struct FrameUnpacker {
    buffer: BytesMut,
}

impl FrameUnpacker {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Append a chunk and drain every frame that is now complete.
    pub fn unpack(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, SessionError> {
        self.buffer.extend_from_slice(chunk);
        let mut codec = FrameCodec;
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut self.buffer)? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn decode_waits_for_full_frame() {
        let frame = Frame::application(vec![1, 2, 3, 4]);
        let wire = frame.to_bytes();

        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&wire[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[3..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn unpacker_handles_combined_frames() {
        let a = Frame::heartbeat();
        let b = Frame::application(b"hello".to_vec());
        let mut wire = a.to_bytes();
        wire.extend(b.to_bytes());

        let mut unpacker = FrameUnpacker::new();
        let frames = unpacker.unpack(&wire).unwrap();
        assert_eq!(frames, vec![a, b]);
    }

    #[test]
    fn oversized_frame_is_an_error() {
        let mut wire = vec![0x03];
        wire.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes());

        let mut unpacker = FrameUnpacker::new();
        assert!(matches!(
            unpacker.unpack(&wire),
            Err(SessionError::OversizedFrame(_))
        ));
    }
}
