//! Error types for the WebSocket transport
//!
//! None of these escape a running [`Connection`](crate::Connection): the
//! supervisor logs them and converts them into the reconnect cycle. They are
//! surfaced directly only by the standalone codec / handshake functions and by
//! configuration parsing.

use std::io;

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Transport error
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying stream failed, including EOF in the middle of a frame
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the stream cleanly between frames
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Declared payload length exceeds the configured maximum
    #[error("frame payload of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: u64, max: usize },

    /// Upgrade handshake rejected or malformed
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Connect, handshake or read did not complete in time
    #[error("operation timed out")]
    Timeout,

    /// Endpoint URL could not be turned into a connection config
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// HTTP Upgrade handshake failure
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Server answered with something other than 101 Switching Protocols
    #[error("Expected 101, got {0}")]
    UnexpectedStatus(u16),

    /// 101 response without a Sec-WebSocket-Accept header
    #[error("missing Sec-WebSocket-Accept header")]
    MissingAccept,

    /// Sec-WebSocket-Accept does not match the key we sent
    #[error("Sec-WebSocket-Accept mismatch: expected {expected}, got {actual}")]
    AcceptMismatch { expected: String, actual: String },

    /// Response head could not be parsed
    #[error("malformed handshake response: {0}")]
    MalformedResponse(String),

    #[error("I/O error during handshake: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for the clean end-of-stream case
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_status_message() {
        let err = HandshakeError::UnexpectedStatus(403);
        assert_eq!(err.to_string(), "Expected 101, got 403");
    }

    #[test]
    fn test_handshake_error_converts() {
        let err: Error = HandshakeError::MissingAccept.into();
        assert!(matches!(err, Error::Handshake(HandshakeError::MissingAccept)));
        assert!(!err.is_connection_closed());
    }
}
