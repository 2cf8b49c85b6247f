//! Protocol messages and payloads.

use crate::{ProtocolError, ProtocolResult, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Server-issued proof-of-work challenge.
    Challenge = 1,
    /// Client-supplied solution.
    Solution = 2,
    /// Quote returned after a verified solution.
    Quote = 3,
    /// Framed error.
    Error = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(MessageType::Challenge),
            2 => Ok(MessageType::Solution),
            3 => Ok(MessageType::Quote),
            4 => Ok(MessageType::Error),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// Proof-of-work challenge payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengePayload {
    /// Random hex prefix the solution is hashed together with.
    pub prefix: String,
    /// Required number of leading '0' hex characters in the hash.
    pub difficulty: u8,
    /// Random hex identifier binding the solution to this challenge.
    pub nonce: String,
    /// Expiry timestamp (RFC 3339).
    pub expires_at: DateTime<Utc>,
}

impl ChallengePayload {
    /// Validate the payload fields.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.prefix.is_empty() {
            return Err(ProtocolError::InvalidPayload("empty prefix".into()));
        }
        if self.difficulty == 0 {
            return Err(ProtocolError::InvalidPayload("zero difficulty".into()));
        }
        if self.nonce.is_empty() {
            return Err(ProtocolError::InvalidPayload("empty nonce".into()));
        }
        if self.expires_at <= Utc::now() {
            return Err(ProtocolError::InvalidPayload(
                "challenge already expired".into(),
            ));
        }
        Ok(())
    }
}

/// Proof-of-work solution payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionPayload {
    /// Prefix echoed back from the challenge.
    pub prefix: String,
    /// Candidate string satisfying the hash constraint.
    pub solution: String,
    /// Nonce echoed back from the challenge.
    pub nonce: String,
}

impl SolutionPayload {
    /// Validate the payload fields.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.prefix.is_empty() {
            return Err(ProtocolError::InvalidPayload("empty prefix".into()));
        }
        if self.solution.is_empty() {
            return Err(ProtocolError::InvalidPayload("empty solution".into()));
        }
        if self.nonce.is_empty() {
            return Err(ProtocolError::InvalidPayload("empty nonce".into()));
        }
        Ok(())
    }
}

/// Quote payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotePayload {
    /// Quote text.
    pub text: String,
    /// Attributed author.
    pub author: String,
}

impl QuotePayload {
    /// Validate the payload fields.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.text.is_empty() {
            return Err(ProtocolError::InvalidPayload("empty quote text".into()));
        }
        Ok(())
    }
}

/// Framed error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable machine-readable code (uppercase ASCII with underscores).
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl ErrorPayload {
    /// Validate the payload fields.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.code.is_empty() {
            return Err(ProtocolError::InvalidPayload("empty error code".into()));
        }
        if !self
            .code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b == b'_')
        {
            return Err(ProtocolError::InvalidPayload(format!(
                "malformed error code: {}",
                self.code
            )));
        }
        if self.message.is_empty() {
            return Err(ProtocolError::InvalidPayload("empty error message".into()));
        }
        Ok(())
    }
}

/// The closed set of payload kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Challenge(ChallengePayload),
    Solution(SolutionPayload),
    Quote(QuotePayload),
    Error(ErrorPayload),
}

impl Payload {
    /// The message type this payload travels under.
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Challenge(_) => MessageType::Challenge,
            Payload::Solution(_) => MessageType::Solution,
            Payload::Quote(_) => MessageType::Quote,
            Payload::Error(_) => MessageType::Error,
        }
    }

    /// Validate the inner payload.
    pub fn validate(&self) -> ProtocolResult<()> {
        match self {
            Payload::Challenge(p) => p.validate(),
            Payload::Solution(p) => p.validate(),
            Payload::Quote(p) => p.validate(),
            Payload::Error(p) => p.validate(),
        }
    }
}

/// A framed protocol message.
///
/// The header is 8 bytes big-endian: version (u8), type (u8), flags (u16),
/// payload length (u32). The payload is JSON of the type identified by the
/// type byte. A zero-length payload is valid.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Protocol version.
    pub version: u8,
    /// Message type.
    pub msg_type: MessageType,
    /// Header flags (currently always zero).
    pub flags: u16,
    /// Raw JSON payload bytes.
    pub payload: Bytes,
}

impl Message {
    /// Build a message from a payload, validating and serializing it.
    pub fn from_payload(payload: &Payload) -> ProtocolResult<Self> {
        payload.validate()?;

        let body = match payload {
            Payload::Challenge(p) => serde_json::to_vec(p)?,
            Payload::Solution(p) => serde_json::to_vec(p)?,
            Payload::Quote(p) => serde_json::to_vec(p)?,
            Payload::Error(p) => serde_json::to_vec(p)?,
        };

        if body.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: body.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            version: PROTOCOL_VERSION,
            msg_type: payload.message_type(),
            flags: 0,
            payload: Bytes::from(body),
        })
    }

    /// Parse and validate the payload according to the message type.
    pub fn payload(&self) -> ProtocolResult<Payload> {
        let payload = match self.msg_type {
            MessageType::Challenge => {
                Payload::Challenge(serde_json::from_slice::<ChallengePayload>(&self.payload)?)
            }
            MessageType::Solution => {
                Payload::Solution(serde_json::from_slice::<SolutionPayload>(&self.payload)?)
            }
            MessageType::Quote => {
                Payload::Quote(serde_json::from_slice::<QuotePayload>(&self.payload)?)
            }
            MessageType::Error => {
                Payload::Error(serde_json::from_slice::<ErrorPayload>(&self.payload)?)
            }
        };
        payload.validate()?;
        Ok(payload)
    }

    /// Serialize the message to header + payload bytes.
    pub fn to_bytes(&self) -> ProtocolResult<Bytes> {
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::InvalidVersion(self.version));
        }
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = Vec::with_capacity(crate::HEADER_SIZE + self.payload.len());
        buf.push(self.version);
        buf.push(self.msg_type as u8);
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);

        Ok(Bytes::from(buf))
    }

    /// Deserialize a complete message from bytes.
    ///
    /// The buffer must contain the full frame: a buffer that ends before the
    /// declared payload length is a fatal framing error.
    pub fn from_bytes(data: &[u8]) -> ProtocolResult<Self> {
        if data.len() < crate::HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                expected: crate::HEADER_SIZE,
                got: data.len(),
            });
        }

        let version = data[0];
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::InvalidVersion(version));
        }

        let msg_type = MessageType::try_from(data[1])?;
        let flags = u16::from_be_bytes([data[2], data[3]]);
        let length = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;

        if length > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let body = &data[crate::HEADER_SIZE..];
        if body.len() < length {
            return Err(ProtocolError::Truncated {
                expected: length,
                got: body.len(),
            });
        }

        Ok(Self {
            version,
            msg_type,
            flags,
            payload: Bytes::copy_from_slice(&body[..length]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_challenge() -> ChallengePayload {
        ChallengePayload {
            prefix: "a1b2c3d4e5f60718".to_string(),
            difficulty: 3,
            nonce: "00112233445566ff".to_string(),
            expires_at: Utc::now() + Duration::minutes(5),
        }
    }

    #[test]
    fn test_message_type_roundtrip() {
        for t in [1u8, 2, 3, 4] {
            let parsed = MessageType::try_from(t).unwrap();
            assert_eq!(parsed as u8, t);
        }
        assert!(MessageType::try_from(0).is_err());
        assert!(MessageType::try_from(5).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let payload = Payload::Challenge(sample_challenge());
        let msg = Message::from_payload(&payload).unwrap();

        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, msg);
        assert_eq!(decoded.payload().unwrap(), payload);
    }

    #[test]
    fn test_zero_length_frame() {
        let header = [PROTOCOL_VERSION, 2, 0, 0, 0, 0, 0, 0];
        let msg = Message::from_bytes(&header).unwrap();
        assert_eq!(msg.msg_type, MessageType::Solution);
        assert!(msg.payload.is_empty());
    }

    #[test]
    fn test_wrong_version_rejected() {
        let header = [2u8, 1, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            Message::from_bytes(&header),
            Err(ProtocolError::InvalidVersion(2))
        ));
    }

    #[test]
    fn test_oversize_length_rejected() {
        let oversize = (MAX_PAYLOAD_SIZE + 1) as u32;
        let mut header = vec![PROTOCOL_VERSION, 1, 0, 0];
        header.extend_from_slice(&oversize.to_be_bytes());
        assert!(matches!(
            Message::from_bytes(&header),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_oversize_payload_rejected_on_encode() {
        let msg = Message {
            version: PROTOCOL_VERSION,
            msg_type: MessageType::Quote,
            flags: 0,
            payload: Bytes::from(vec![b'x'; MAX_PAYLOAD_SIZE + 1]),
        };
        assert!(matches!(
            msg.to_bytes(),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_short_payload_rejected() {
        let mut buf = vec![PROTOCOL_VERSION, 3, 0, 0];
        buf.extend_from_slice(&16u32.to_be_bytes());
        buf.extend_from_slice(b"short");
        assert!(matches!(
            Message::from_bytes(&buf),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_expired_challenge_fails_validation() {
        let mut challenge = sample_challenge();
        challenge.expires_at = Utc::now() - Duration::seconds(1);
        assert!(challenge.validate().is_err());
    }

    #[test]
    fn test_error_code_format() {
        let ok = ErrorPayload {
            code: "INVALID_SOLUTION".to_string(),
            message: "solution verification failed".to_string(),
        };
        assert!(ok.validate().is_ok());

        let bad = ErrorPayload {
            code: "invalid-solution".to_string(),
            message: "x".to_string(),
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_empty_solution_fields_rejected() {
        let solution = SolutionPayload {
            prefix: String::new(),
            solution: "1".to_string(),
            nonce: "n".to_string(),
        };
        assert!(solution.validate().is_err());
    }
}
