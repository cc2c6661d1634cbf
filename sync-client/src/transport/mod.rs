//! Transport abstraction for actionsync clients.
//!
//! The transport moves whole protocol [`Frame`]s; implementations handle
//! the JSON wire encoding and the underlying connection mechanism
//! (WebSocket, mock for testing).
//!
//! # Design
//!
//! The trait is async and connection-oriented:
//! - `connect()` establishes a connection to a server URL
//! - `send()` / `recv()` move frames
//! - `close()` terminates gracefully
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.connect("ws://localhost:31337").await?;
//! transport.send(&frame).await?;
//! let reply = transport.recv().await?;
//! ```

mod mock;
mod ws;

pub use mock::MockTransport;
pub use ws::WsTransport;

use async_trait::async_trait;
use sync_types::Frame;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The peer sent something that does not decode as a frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Transport for exchanging protocol frames with a sync server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to the server at the given URL.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Send one frame over the connection.
    async fn send(&self, frame: &Frame) -> Result<(), TransportError>;

    /// Receive the next frame, waiting until one is available or the
    /// connection closes.
    async fn recv(&self) -> Result<Frame, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
