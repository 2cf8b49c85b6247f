//! Protocol error types.

use thiserror::Error;

/// Protocol errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Header carried an unsupported protocol version.
    #[error("unsupported protocol version: {0}")]
    InvalidVersion(u8),

    /// Unknown message type byte.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Declared payload length exceeds the protocol maximum.
    #[error("message too large: {size} bytes, max {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Buffer ended before the declared payload length.
    #[error("truncated message: expected {expected} payload bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    /// Payload failed validation.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// JSON serialization error.
    #[error("payload serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
