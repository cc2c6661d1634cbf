//! Connection-status badge overlay.
//!
//! The terminal counterpart of an on-page status widget: maps connection
//! states to human-readable lines and prints them to stderr on every
//! transition.

use crate::client::Client;
use crate::state::ClientState;
use crate::transport::Transport;

/// Human-readable messages shown by the badge, one per connection state.
#[derive(Debug, Clone)]
pub struct BadgeMessages {
    /// Shown when the client is connected and idle.
    pub synchronized: String,
    /// Shown when the client has given up or not yet started.
    pub disconnected: String,
    /// Shown during a connection attempt.
    pub connecting: String,
    /// Shown while local changes are in flight.
    pub sending: String,
    /// Shown while waiting to retry after a lost connection.
    pub reconnecting: String,
}

impl BadgeMessages {
    /// The default English message set.
    pub fn english() -> Self {
        Self {
            synchronized: "Your device is connected to the server".into(),
            disconnected: "Your device is offline".into(),
            connecting: "Connecting to the server".into(),
            sending: "Sending your changes".into(),
            reconnecting: "Connection lost, trying to reconnect".into(),
        }
    }
}

impl Default for BadgeMessages {
    fn default() -> Self {
        Self::english()
    }
}

fn badge_line(state: &ClientState, messages: &BadgeMessages) -> String {
    match state {
        ClientState::Synchronized => messages.synchronized.clone(),
        ClientState::Disconnected => messages.disconnected.clone(),
        ClientState::Connecting => messages.connecting.clone(),
        ClientState::Sending => messages.sending.clone(),
        ClientState::Reconnecting { .. } => messages.reconnecting.clone(),
    }
}

/// Attach a connection-status badge to a client.
///
/// Every state change prints its status line to stderr.
pub fn badge<T: Transport>(client: &Client<T>, messages: BadgeMessages) {
    client.on_state_change(move |state| {
        eprintln!("[sync] {}", badge_line(state, &messages));
    });
}
