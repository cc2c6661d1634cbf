//! # sync-client
//!
//! Client library for the actionsync real-time sync protocol.
//!
//! This is the library application frontends use to keep a local store in
//! sync with a server.
//!
//! ## Features
//!
//! - **Reducer-driven store**: dispatch actions locally, sync them out
//! - **Transport abstraction**: pluggable transport layer (WebSocket, mock)
//! - **Diagnostic overlays**: connection-status badge and event logger
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{badge, log, BadgeMessages, ClientOptions, StoreCreator};
//!
//! let creator = StoreCreator::new(ClientOptions {
//!     subprotocol: "1.0.0".into(),
//!     server: "ws://localhost:31337".into(),
//!     user_id: None,
//!     credentials: String::new(),
//! });
//! let store = creator.create(serde_json::json!({}), my_reducer);
//! badge(store.client(), BadgeMessages::english());
//! log(store.client());
//! store.client().start()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod badge;
pub mod client;
pub mod log;
pub mod state;
pub mod store;
pub mod transport;

pub use badge::{badge, BadgeMessages};
pub use client::{Client, ClientError, ClientOptions};
pub use log::log;
pub use state::{reconnect_delay, ClientState};
pub use store::{State, Store, StoreCreator};
pub use transport::{MockTransport, Transport, TransportError, WsTransport};
