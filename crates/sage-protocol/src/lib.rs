//! # sage-protocol
//!
//! Wire protocol for the sage quote service.
//!
//! This crate provides:
//! - Message framing (fixed 8-byte header + JSON payload)
//! - Payload types for the challenge/solution exchange
//! - A tokio codec for running the protocol over a TCP stream

mod codec;
mod error;
mod message;

pub use codec::FrameCodec;
pub use error::{ProtocolError, ProtocolResult};
pub use message::{
    ChallengePayload, ErrorPayload, Message, MessageType, Payload, QuotePayload, SolutionPayload,
};

/// Protocol version carried in every header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Header size: version (1) + type (1) + flags (2) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Maximum total message size (header + payload).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Maximum payload size.
pub const MAX_PAYLOAD_SIZE: usize = MAX_MESSAGE_SIZE - HEADER_SIZE;

/// Error code sent when the server fails internally mid-exchange.
pub const CODE_INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Error code sent when a proof-of-work solution does not verify.
pub const CODE_INVALID_SOLUTION: &str = "INVALID_SOLUTION";

/// Error code sent when the client's frame is not a solution.
pub const CODE_INVALID_MESSAGE_TYPE: &str = "INVALID_MESSAGE_TYPE";
