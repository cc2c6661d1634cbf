//! Error types for sync-server.

use thiserror::Error;

/// Main error type for server construction and the listen loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The configured subprotocol or supported range does not parse.
    #[error("invalid options: {0}")]
    Options(#[from] sync_types::SyncError),

    /// I/O error while binding or serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// WebSocket session errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer sent something that does not decode as a frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// No connect frame arrived within the handshake timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The first frame was not a connect frame.
    #[error("expected connect frame, got {0}")]
    UnexpectedFrame(String),

    /// The connection closed mid-frame.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
