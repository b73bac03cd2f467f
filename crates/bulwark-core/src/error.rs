//! Error types for the wire protocol

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while framing or decoding a message
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer sent more than the allowed number of bytes before a newline
    #[error("message exceeds maximum size of {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// The stream ended before a complete message arrived
    #[error("connection closed before a complete message was received")]
    UnexpectedEof,

    /// The peer did not deliver a complete message in time
    #[error("timed out waiting for a complete message after {secs}s")]
    ReadTimeout { secs: u64 },

    /// The bytes were not a valid message
    #[error("malformed message: {0}")]
    Malformed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Malformed(e.to_string())
    }
}
