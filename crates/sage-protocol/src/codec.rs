//! Frame codec for the sage wire protocol.
//!
//! Message format:
//!
//! ```text
//! +----------+----------+----------+----------+
//! | Version  |   Type   |  Flags   |  Length  |
//! | 1 byte   | 1 byte   | 2 bytes  | 4 bytes  |
//! +----------+----------+----------+----------+
//! |            Payload (Length bytes)         |
//! +-------------------------------------------+
//! ```
//!
//! All header fields are big-endian. The payload is JSON of the type
//! identified by the type byte. The codec buffers partial frames, so a
//! decoded message always carries its complete payload.

use crate::{
    Message, MessageType, ProtocolError, HEADER_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec framing sage messages over a byte stream.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least the header
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Parse the header without consuming
        let version = src[0];
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::InvalidVersion(version));
        }

        let msg_type = MessageType::try_from(src[1])?;
        let flags = u16::from_be_bytes([src[2], src[3]]);
        let length = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;

        if length > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        // Wait for the full frame
        let total = HEADER_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();

        Ok(Some(Message {
            version,
            msg_type,
            flags,
            payload,
        }))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.version != PROTOCOL_VERSION {
            return Err(ProtocolError::InvalidVersion(item.version));
        }
        if item.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: item.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        dst.reserve(HEADER_SIZE + item.payload.len());
        dst.put_u8(item.version);
        dst.put_u8(item.msg_type as u8);
        dst.put_u16(item.flags);
        dst.put_u32(item.payload.len() as u32);
        dst.put_slice(&item.payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorPayload, Payload};

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = FrameCodec::new();
        let msg = Message::from_payload(&Payload::Error(ErrorPayload {
            code: "INTERNAL_ERROR".to_string(),
            message: "failed to create challenge".to_string(),
        }))
        .unwrap();

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = FrameCodec::new();
        let msg = Message::from_payload(&Payload::Error(ErrorPayload {
            code: "INTERNAL_ERROR".to_string(),
            message: "x".to_string(),
        }))
        .unwrap();

        let mut full = BytesMut::new();
        codec.encode(msg.clone(), &mut full).unwrap();

        // Feed the frame one byte at a time; only the last byte completes it
        let mut partial = BytesMut::new();
        let bytes = full.freeze();
        for (i, b) in bytes.iter().enumerate() {
            partial.put_u8(*b);
            let result = codec.decode(&mut partial).unwrap();
            if i + 1 < bytes.len() {
                assert!(result.is_none());
            } else {
                assert_eq!(result.unwrap(), msg);
            }
        }
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[9u8, 1, 0, 0, 0, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::InvalidVersion(9))
        ));
    }

    #[test]
    fn test_decode_rejects_oversize() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(1);
        buf.put_u16(0);
        buf.put_u32((MAX_PAYLOAD_SIZE + 1) as u32);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_zero_length() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[PROTOCOL_VERSION, 2, 0, 0, 0, 0, 0, 0][..]);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.msg_type, MessageType::Solution);
        assert!(msg.payload.is_empty());
    }
}
