//! Client connection lifecycle.
//!
//! Pure state values plus the reconnect backoff schedule. No I/O lives
//! here; the connection task in [`crate::client`] owns the transitions and
//! this module keeps them observable and testable.

use std::fmt;
use std::time::Duration;

/// Connection lifecycle states, observable through
/// [`Client::on_state_change`](crate::Client::on_state_change).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected and not trying to connect.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected, handshake accepted, nothing queued.
    Synchronized,
    /// Connected with locally dispatched actions in flight.
    Sending,
    /// Connection lost, waiting to retry.
    Reconnecting {
        /// Number of reconnection attempts so far.
        attempt: u32,
    },
}

impl ClientState {
    /// Whether the client currently holds an accepted connection.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Synchronized | Self::Sending)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Synchronized => "synchronized",
            Self::Sending => "sending",
            Self::Reconnecting { .. } => "reconnecting",
        };
        f.write_str(name)
    }
}

const BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Delay before reconnection attempt number `attempt` (1-based).
///
/// Doubles per attempt starting from half a second, capped at thirty
/// seconds.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(8);
    let delay = BASE_DELAY.saturating_mul(2u32.saturating_pow(exponent));
    delay.min(MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_states() {
        assert!(ClientState::Synchronized.is_connected());
        assert!(ClientState::Sending.is_connected());
        assert!(!ClientState::Disconnected.is_connected());
        assert!(!ClientState::Connecting.is_connected());
        assert!(!ClientState::Reconnecting { attempt: 3 }.is_connected());
    }

    #[test]
    fn display_names() {
        assert_eq!(ClientState::Synchronized.to_string(), "synchronized");
        assert_eq!(
            ClientState::Reconnecting { attempt: 1 }.to_string(),
            "reconnecting"
        );
    }

    #[test]
    fn backoff_doubles_from_base() {
        assert_eq!(reconnect_delay(1), Duration::from_millis(500));
        assert_eq!(reconnect_delay(2), Duration::from_secs(1));
        assert_eq!(reconnect_delay(3), Duration::from_secs(2));
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(reconnect_delay(7), MAX_DELAY);
        assert_eq!(reconnect_delay(100), MAX_DELAY);
        assert_eq!(reconnect_delay(u32::MAX), MAX_DELAY);
    }

    #[test]
    fn attempt_zero_treated_as_first() {
        assert_eq!(reconnect_delay(0), reconnect_delay(1));
    }
}
