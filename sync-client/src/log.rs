//! Console logging overlay for a sync client.
//!
//! Subscribes a tracing-based logger to a client's state transitions and
//! incoming actions. Attach once at bootstrap, next to the badge.

use crate::client::Client;
use crate::transport::Transport;

/// Attach the logging overlay to a client.
pub fn log<T: Transport>(client: &Client<T>) {
    client.on_state_change(|state| {
        tracing::info!(state = %state, "sync state changed");
    });
    client.on_action(|action| {
        tracing::info!(action_type = %action.kind, "action received from server");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientOptions;
    use crate::transport::MockTransport;

    #[tokio::test]
    async fn log_attaches_without_side_effects() {
        let client = Client::new(
            ClientOptions {
                subprotocol: "1.0.0".into(),
                server: "ws://localhost:31337".into(),
                user_id: None,
                credentials: String::new(),
            },
            MockTransport::new(),
        );
        log(&client);
    }
}
