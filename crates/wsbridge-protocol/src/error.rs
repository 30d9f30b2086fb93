//! Error types for wsbridge-protocol

use crate::close::CloseCode;
use http::StatusCode;
use thiserror::Error;

/// Framing / transport error
#[derive(Debug, Error)]
pub enum Error {
    /// Framing violation (bad opcode, bad fragmentation, bad close payload, ...)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Text payload or close reason is not valid UTF-8
    #[error("invalid utf-8 in text payload")]
    Encoding,

    /// Control frame exceeds 125 bytes
    #[error("frame too large: {0}")]
    FrameTooLarge(String),

    /// Reassembled data message exceeds the configured limit
    #[error("message too large: {size} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Size the message would have reached
        size: u64,
        /// Configured limit
        limit: usize,
    },

    /// The socket is closed, or the peer went away
    #[error("connection closed")]
    ConnectionClosed,

    /// Underlying I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Close code to send to the peer for this error.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::Protocol(_) | Error::FrameTooLarge(_) => CloseCode::PROTOCOL_ERROR,
            Error::Encoding => CloseCode::INVALID_PAYLOAD,
            Error::MessageTooLarge { .. } => CloseCode::MESSAGE_TOO_BIG,
            Error::ConnectionClosed | Error::Io(_) => CloseCode::GOING_AWAY,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Upgrade handshake failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// Malformed or missing upgrade headers
    #[error("bad handshake: {0}")]
    BadRequest(String),

    /// Client did not ask for a websocket upgrade
    #[error("upgrade required")]
    UpgradeRequired,

    /// Client asked for a websocket version this server does not speak
    #[error("unsupported websocket version: {0}")]
    UnsupportedVersion(String),
}

impl HandshakeError {
    /// HTTP status to answer the upgrade request with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            HandshakeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HandshakeError::UpgradeRequired | HandshakeError::UnsupportedVersion(_) => {
                StatusCode::UPGRADE_REQUIRED
            }
        }
    }

    pub(crate) fn bad_request(msg: impl Into<String>) -> Self {
        HandshakeError::BadRequest(msg.into())
    }
}
