//! Actions: schema-free state-change events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action type clients dispatch to subscribe to a channel.
pub const SUBSCRIBE_TYPE: &str = "sync/subscribe";

/// Action type the server sends to revert an action on the client.
pub const UNDO_TYPE: &str = "sync/undo";

/// A state-change event exchanged between client and server.
///
/// Every action carries a `type` discriminator; the remaining payload is
/// schema-free JSON owned by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// The action type discriminator, e.g. `users/rename`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Application-defined payload fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Action {
    /// Create a new action with the given type and no payload fields.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Add a payload field (builder style).
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Get a payload field by key.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a payload field as a string slice.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Whether this is a channel subscription action.
    pub fn is_subscribe(&self) -> bool {
        self.kind == SUBSCRIBE_TYPE
    }

    /// The channel name of a subscription action, if present.
    pub fn channel(&self) -> Option<&str> {
        self.str_field("channel")
    }

    /// Build a subscription action for the given channel.
    pub fn subscribe(channel: &str) -> Self {
        Self::new(SUBSCRIBE_TYPE).with_field("channel", channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_serializes_with_flat_payload() {
        let action = Action::new("users/rename")
            .with_field("userId", "38")
            .with_field("name", "New");

        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "users/rename");
        assert_eq!(json["userId"], "38");
        assert_eq!(json["name"], "New");
    }

    #[test]
    fn action_deserializes_unknown_fields_into_payload() {
        let action: Action =
            serde_json::from_str(r#"{"type":"counter/add","amount":3}"#).unwrap();
        assert_eq!(action.kind, "counter/add");
        assert_eq!(action.field("amount"), Some(&Value::from(3)));
    }

    #[test]
    fn action_roundtrip_preserves_every_field() {
        let action = Action::new("x").with_field("a", 1).with_field("b", "two");
        let json = serde_json::to_string(&action).unwrap();
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn subscribe_action_exposes_channel() {
        let action = Action::subscribe("users/38");
        assert!(action.is_subscribe());
        assert_eq!(action.channel(), Some("users/38"));
    }

    #[test]
    fn channel_absent_on_plain_action() {
        let action = Action::new("users/rename");
        assert!(!action.is_subscribe());
        assert_eq!(action.channel(), None);
    }

    #[test]
    fn str_field_rejects_non_strings() {
        let action = Action::new("x").with_field("n", 7);
        assert_eq!(action.str_field("n"), None);
    }
}
