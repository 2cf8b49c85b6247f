//! Client error types.

use sage_protocol::{MessageType, ProtocolError};
use thiserror::Error;

/// Client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Could not reach the server within the connect timeout.
    #[error("connection timed out")]
    ConnectTimeout,

    /// An I/O step did not finish within its deadline.
    #[error("exchange timed out")]
    Timeout,

    /// The server closed the connection mid-exchange.
    ///
    /// Admission rejections look like this on the client side: the server
    /// never frames a reason.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// The server sent something unexpected for this point in the exchange.
    #[error("unexpected message type: {0:?}")]
    UnexpectedMessage(MessageType),

    /// The server framed an error.
    #[error("server error: {code} - {message}")]
    Server { code: String, message: String },

    /// Solving was cancelled before a solution was found.
    #[error("solve cancelled")]
    Cancelled,

    /// Protocol-level failure (framing, validation, serialization).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
