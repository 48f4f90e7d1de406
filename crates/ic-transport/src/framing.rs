//! Message framing for the mesh transport
//!
//! Wire format: 4-byte big-endian length (covering everything after the
//! length prefix), 1-byte tag length, tag bytes, payload bytes.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;
const MAX_TAG_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    TooLarge(usize),
    #[error("tag too long: {0} bytes (max {MAX_TAG_LEN})")]
    TagTooLong(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame tag is not valid utf-8")]
    InvalidTag,
}

/// A tagged frame. The tag is the transport's routing key; the core uses
/// `"Handshake"` and `"Handshake_response"` for the negotiation round trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub tag: String,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(tag: impl Into<String>, payload: Vec<u8>) -> Self {
        Self { tag: tag.into(), payload }
    }
}

#[derive(Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 5 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }
        if src.len() < 4 + length {
            return Ok(None);
        }

        src.advance(4);
        let tag_len = src[0] as usize;
        src.advance(1);
        let tag_bytes = src.split_to(tag_len);
        let tag = String::from_utf8(tag_bytes.to_vec()).map_err(|_| FrameError::InvalidTag)?;
        let payload_len = length - 1 - tag_len;
        let payload = src.split_to(payload_len).to_vec();

        Ok(Some(Frame { tag, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.tag.len() > MAX_TAG_LEN {
            return Err(FrameError::TagTooLong(item.tag.len()));
        }
        let length = 1 + item.tag.len() + item.payload.len();
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }

        dst.put_u32(length as u32);
        dst.put_u8(item.tag.len() as u8);
        dst.put_slice(item.tag.as_bytes());
        dst.put_slice(&item.payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let mut codec = FrameCodec::new();
        let frame = Frame::new("Handshake", vec![1, 2, 3, 4, 5]);

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.tag, frame.tag);
        assert_eq!(decoded.payload, frame.payload);
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let mut codec = FrameCodec::new();
        let frame = Frame::new("Handshake_response", vec![9; 64]);
        let mut full = BytesMut::new();
        codec.encode(frame, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[full.len() - 1..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn encode_rejects_oversized_tag() {
        let mut codec = FrameCodec::new();
        let frame = Frame::new("x".repeat(MAX_TAG_LEN + 1), vec![]);
        let mut buf = BytesMut::new();
        assert!(matches!(codec.encode(frame, &mut buf), Err(FrameError::TagTooLong(_))));
    }
}
