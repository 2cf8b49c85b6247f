//! Server error types.

use sage_protocol::{MessageType, ProtocolError};
use thiserror::Error;

/// Server errors.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Protocol-level failure (framing, validation, serialization).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer closed the connection mid-exchange.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The peer did not complete an I/O step within its deadline.
    #[error("exchange timed out")]
    Timeout,

    /// The peer sent something other than a solution.
    #[error("unexpected message type: {0:?}")]
    UnexpectedMessage(MessageType),

    /// The peer's solution did not verify.
    #[error("solution verification failed")]
    InvalidSolution,

    /// In-flight handlers did not drain within the shutdown grace period.
    #[error("shutdown timed out with handlers still in flight")]
    ShutdownTimeout,

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Whether this error should count against the peer's failed attempts.
    ///
    /// A clean close is the one outcome that is never the peer's fault.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, ServerError::ConnectionClosed)
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
