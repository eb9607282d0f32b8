//! Error types for pairlink

use thiserror::Error;

/// Main error type for pairlink operations
///
/// Only `Generation` is treated as fatal; every other variant returns control
/// to the caller with enough context to restart the handshake from idle.
/// Security-relevant rejections never carry key material in their message.
#[derive(Error, Debug)]
pub enum Error {
    #[error("random source unavailable: {0}")]
    Generation(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("unsupported format version {found} (expected {expected})")]
    UnsupportedVersion { found: u8, expected: u8 },

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("confirmation proof mismatch")]
    ProofMismatch,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("operation cancelled")]
    Cancelled,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using pairlink's Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors the caller may recover from by restarting the
    /// handshake with a fresh pairing code.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Generation(_))
    }
}
