//! Error types for wsbridge-gateway

use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;
use wsbridge_protocol::{error_response, CloseCode, HandshakeError};

/// Gateway error type
#[derive(Debug, Error)]
pub enum Error {
    /// Upgrade request failed validation
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// The request head could not be read or parsed
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Request path is outside the websocket prefix
    #[error("not found: {0}")]
    NotFound(String),

    /// No registered facility pattern matches
    #[error("unknown facility: {0}")]
    UnknownFacility(String),

    /// The channel policy rejected the request
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Framing error after the upgrade
    #[error(transparent)]
    Protocol(#[from] wsbridge_protocol::Error),

    /// Broker failure
    #[error(transparent)]
    Broker(#[from] wsbridge_core::Error),

    /// The upgrade head did not arrive in time
    #[error("timed out waiting for the upgrade request")]
    Timeout,

    /// Transport I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status for errors raised before the upgrade completes.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Handshake(e) => e.status(),
            Error::MalformedRequest(_) | Error::UnknownFacility(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Error::Timeout => StatusCode::REQUEST_TIMEOUT,
            Error::Protocol(_) | Error::Broker(_) | Error::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Close code for errors raised after the upgrade.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::Protocol(e) => e.close_code(),
            Error::PermissionDenied(_) => CloseCode::POLICY_VIOLATION,
            Error::Broker(_) => CloseCode::INTERNAL_ERROR,
            _ => CloseCode::GOING_AWAY,
        }
    }

    /// Serialized HTTP error response for a failed upgrade.
    #[must_use]
    pub fn response(&self) -> Bytes {
        let status = self.status();
        let body = self.to_string();
        if status == StatusCode::UPGRADE_REQUIRED {
            error_response(status, &body, &[("Sec-WebSocket-Version", "13")])
        } else {
            error_response(status, &body, &[])
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
