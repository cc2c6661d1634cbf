//! # sync-types
//!
//! Wire format types for the actionsync real-time action synchronization
//! protocol.
//!
//! This crate provides the foundational types used across all actionsync
//! crates:
//! - [`Action`] - Schema-free state-change events with a `type` discriminator
//! - [`ActionId`], [`Meta`] - Per-action bookkeeping with a total order
//! - [`Subprotocol`], [`SupportedRange`] - Application version negotiation
//! - [`Frame`] - Messages on the client/server WebSocket connection
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod action;
mod error;
mod frame;
mod meta;
mod subprotocol;

pub use action::{Action, SUBSCRIBE_TYPE, UNDO_TYPE};
pub use error::SyncError;
pub use frame::Frame;
pub use meta::{ActionId, Meta};
pub use subprotocol::{
    protocol_version_is_supported, Subprotocol, SupportedRange, PROTOCOL_VERSION,
};
