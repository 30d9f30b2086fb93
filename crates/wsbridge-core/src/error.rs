//! Error types for wsbridge-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Broker connection or command failure
    #[error("broker error: {0}")]
    Broker(String),

    /// Audience descriptor or audience name could not be understood
    #[error("invalid audience: {0}")]
    InvalidAudience(String),
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Broker(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
