//! # sync-server
//!
//! Action synchronization server for the actionsync protocol.
//!
//! This crate implements a server that:
//! - Accepts WebSocket connections from sync clients
//! - Negotiates wire protocol version and application subprotocol
//! - Runs every action through the command pipeline
//!   (resend, access, process, finalize)
//! - Routes actions to channel subscribers
//! - Exposes a secret-guarded HTTP control endpoint for trusted producers
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                      ┌── Client B
//!            │      WebSocket       │
//!            ├─────────────────────►│
//!            │                      │
//!        ┌───┴──────────────────────┴───┐
//!        │         sync-server          │
//!        │  ┌────────────────────────┐  │
//!        │  │ command pipeline + log │  │
//!        │  └────────────────────────┘  │
//!        └───────────▲──────────────────┘
//!                    │ HTTP control (secret)
//!               backend producers
//! ```
//!
//! ## Protocol
//!
//! WebSocket frames: CONNECT → CONNECTED / DENIED / WRONG_SUBPROTOCOL
//! (handshake), ACTION → SYNCED or a `sync/undo` action, PING → PONG.
//! The control endpoint accepts `{ version, secret, commands }` and
//! returns the flattened answer list.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod log;
pub mod request;
pub mod server;
pub mod session;
pub mod throttle;

pub use command::{
    ActionCommand, ActionHandler, Answer, AuthRequest, ChannelHandler, HandlerError, Headers,
    LoadedAction,
};
pub use config::{ConfigError, ServerOptions};
pub use control::{add, AddError};
pub use dispatch::{ActionDispatcher, ChannelDispatcher, ChannelParams, DispatchError};
pub use error::{ProtocolError, ServerError};
pub use server::{Server, ServerMetrics};
