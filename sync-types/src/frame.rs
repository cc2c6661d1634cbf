//! WebSocket wire frames exchanged between client and server.
//!
//! Frames are JSON objects tagged by a `frame` key. The first frame on
//! every connection must be [`Frame::Connect`]; the server answers with
//! [`Frame::Connected`] or one of the rejection frames before any actions
//! flow.

use crate::action::Action;
use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single message on the client/server WebSocket connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "camelCase")]
pub enum Frame {
    /// Client handshake, first frame on every connection.
    #[serde(rename_all = "camelCase")]
    Connect {
        /// Wire protocol version the client speaks.
        protocol: u32,
        /// Application subprotocol the client was built against.
        subprotocol: String,
        /// Unique node id of the connecting client.
        node_id: String,
        /// User identity, unset for anonymous clients.
        user_id: Option<String>,
        /// Opaque credential string, may be empty.
        credentials: String,
    },

    /// Server accepts the handshake.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// Subprotocol the server is running.
        subprotocol: String,
    },

    /// Server rejects the handshake: credentials denied.
    Denied,

    /// Server rejects the handshake: subprotocol outside the supported range.
    #[serde(rename_all = "camelCase")]
    WrongSubprotocol {
        /// The range of subprotocols the server accepts.
        supported: String,
    },

    /// Fatal protocol error with details.
    Error {
        /// Human-readable failure description.
        details: String,
    },

    /// An action with its raw meta record.
    Action {
        /// The action payload.
        action: Action,
        /// Raw meta map; parse with [`crate::Meta::from_raw`].
        meta: Map<String, Value>,
    },

    /// Server confirmation that the action with this id was processed.
    Synced {
        /// Wire id of the processed action.
        id: String,
    },

    /// Keepalive probe.
    Ping,

    /// Keepalive response.
    Pong,
}

impl Frame {
    /// Encode the frame as a JSON string.
    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a frame from a JSON string.
    pub fn from_json(s: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(s)?)
    }
}
