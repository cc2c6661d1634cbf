//! Error types for actionsync.

use thiserror::Error;

/// Errors shared across the actionsync crates.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON encoding or decoding failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An action id did not match `"<time> <uid> <counter>"`.
    #[error("malformed action id: {0}")]
    MalformedId(String),

    /// A meta record was missing a required key or had a wrong type.
    #[error("malformed meta: {0}")]
    MalformedMeta(String),

    /// A subprotocol version or range failed to parse.
    #[error("malformed subprotocol: {0}")]
    MalformedSubprotocol(#[from] semver::Error),

    /// The peer speaks an incompatible wire protocol version.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// Connection-level failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Invariant violation inside the library.
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::UnsupportedVersion(3);
        assert_eq!(err.to_string(), "unsupported protocol version: 3");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
