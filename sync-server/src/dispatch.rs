//! Dispatcher registries for action and channel handlers.
//!
//! Registration happens at startup and is validated eagerly: empty types
//! or patterns, duplicates, and non-compiling channel regexes are errors.
//! Lookup is concurrent; channels match first registered pattern first.

use crate::command::{ActionHandler, ChannelHandler};
use dashmap::DashMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Parameters captured from a channel pattern's named groups.
pub type ChannelParams = HashMap<String, String>;

/// Registration errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A handler returned an empty action type.
    #[error("action type must not be empty")]
    EmptyActionType,

    /// Two handlers claimed the same action type.
    #[error("action type `{0}` already registered")]
    DuplicateAction(String),

    /// A handler returned an empty channel pattern.
    #[error("channel pattern must not be empty")]
    EmptyChannelPattern,

    /// Two handlers claimed the same channel pattern.
    #[error("channel pattern `{0}` already registered")]
    DuplicateChannel(String),

    /// A channel pattern does not compile as a regex.
    #[error("invalid channel pattern `{pattern}`: {source}")]
    InvalidChannelPattern {
        /// The offending pattern.
        pattern: String,
        /// Underlying regex error.
        source: regex::Error,
    },
}

/// Registry of action handlers keyed by action type.
#[derive(Default)]
pub struct ActionDispatcher {
    actions: DashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionDispatcher {
    /// Register a handler for its action type.
    pub fn register(&self, handler: Arc<dyn ActionHandler>) -> Result<(), DispatchError> {
        let kind = handler.action_type().to_string();
        if kind.is_empty() {
            return Err(DispatchError::EmptyActionType);
        }
        if self.actions.contains_key(&kind) {
            return Err(DispatchError::DuplicateAction(kind));
        }
        tracing::info!(action_type = %kind, "registering action handler");
        self.actions.insert(kind, handler);
        Ok(())
    }

    /// Whether a handler exists for the given action type.
    pub fn has(&self, action_type: &str) -> bool {
        self.actions.contains_key(action_type)
    }

    /// Look up the handler for an action type.
    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.actions.get(action_type).map(|entry| entry.value().clone())
    }

    /// Number of registered action types.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Registry of channel handlers matched by pattern.
#[derive(Default)]
pub struct ChannelDispatcher {
    channels: RwLock<Vec<(Regex, Arc<dyn ChannelHandler>)>>,
}

impl ChannelDispatcher {
    /// Register a handler for its channel pattern.
    pub fn register(&self, handler: Arc<dyn ChannelHandler>) -> Result<(), DispatchError> {
        let pattern = handler.pattern().to_string();
        if pattern.is_empty() {
            return Err(DispatchError::EmptyChannelPattern);
        }

        let mut channels = self.channels.write().unwrap();
        if channels.iter().any(|(regex, _)| regex.as_str() == pattern) {
            return Err(DispatchError::DuplicateChannel(pattern));
        }
        let regex = Regex::new(&pattern).map_err(|source| DispatchError::InvalidChannelPattern {
            pattern: pattern.clone(),
            source,
        })?;
        tracing::info!(%pattern, "registering channel handler");
        channels.push((regex, handler));
        Ok(())
    }

    /// Find the first handler whose pattern matches the channel name,
    /// along with the captured parameters.
    pub fn matching(&self, channel: &str) -> Option<(Arc<dyn ChannelHandler>, ChannelParams)> {
        let channels = self.channels.read().unwrap();
        for (regex, handler) in channels.iter() {
            if let Some(captures) = regex.captures(channel) {
                let params = regex
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        captures
                            .name(name)
                            .map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect();
                return Some((handler.clone(), params));
            }
        }
        tracing::warn!(%channel, "no channel handler matches");
        None
    }

    /// Number of registered channel patterns.
    pub fn len(&self) -> usize {
        self.channels.read().unwrap().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.channels.read().unwrap().is_empty()
    }
}

/// Shortcut bundling the action and channel registries.
#[derive(Default)]
pub struct Dispatcher {
    /// Action handler registry.
    pub actions: ActionDispatcher,
    /// Channel handler registry.
    pub channels: ChannelDispatcher,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Headers, HandlerError, LoadedAction};
    use async_trait::async_trait;
    use sync_types::{Action, Meta};

    struct NamedAction(&'static str);

    #[async_trait]
    impl ActionHandler for NamedAction {
        fn action_type(&self) -> &str {
            self.0
        }

        async fn access(
            &self,
            _action: &Action,
            _meta: &Meta,
            _headers: &Headers,
        ) -> Result<bool, HandlerError> {
            Ok(true)
        }
    }

    struct NamedChannel(&'static str);

    #[async_trait]
    impl ChannelHandler for NamedChannel {
        fn pattern(&self) -> &str {
            self.0
        }

        async fn access(
            &self,
            _action: &Action,
            _meta: &Meta,
            _params: &ChannelParams,
            _headers: &Headers,
        ) -> Result<bool, HandlerError> {
            Ok(true)
        }

        async fn load(
            &self,
            _action: &Action,
            _meta: &Meta,
            _params: &ChannelParams,
            _headers: &Headers,
        ) -> Result<Vec<LoadedAction>, HandlerError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn registers_and_finds_action_handlers() {
        let dispatcher = ActionDispatcher::default();
        dispatcher.register(Arc::new(NamedAction("users/rename"))).unwrap();

        assert!(dispatcher.has("users/rename"));
        assert!(dispatcher.get("users/rename").is_some());
        assert!(!dispatcher.has("users/remove"));
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn duplicate_action_type_is_rejected() {
        let dispatcher = ActionDispatcher::default();
        dispatcher.register(Arc::new(NamedAction("users/rename"))).unwrap();
        let result = dispatcher.register(Arc::new(NamedAction("users/rename")));
        assert!(matches!(result, Err(DispatchError::DuplicateAction(_))));
    }

    #[test]
    fn empty_action_type_is_rejected() {
        let dispatcher = ActionDispatcher::default();
        let result = dispatcher.register(Arc::new(NamedAction("")));
        assert!(matches!(result, Err(DispatchError::EmptyActionType)));
    }

    #[test]
    fn channel_lookup_captures_named_params() {
        let dispatcher = ChannelDispatcher::default();
        dispatcher
            .register(Arc::new(NamedChannel(r"^users/(?P<user_id>\w+)$")))
            .unwrap();

        let (_, params) = dispatcher.matching("users/38").unwrap();
        assert_eq!(params.get("user_id").map(String::as_str), Some("38"));
    }

    #[test]
    fn unmatched_channel_returns_none() {
        let dispatcher = ChannelDispatcher::default();
        dispatcher
            .register(Arc::new(NamedChannel(r"^users/(?P<user_id>\w+)$")))
            .unwrap();
        assert!(dispatcher.matching("rooms/12").is_none());
    }

    #[test]
    fn first_matching_pattern_wins() {
        let dispatcher = ChannelDispatcher::default();
        dispatcher
            .register(Arc::new(NamedChannel(r"^users/(?P<user_id>\w+)$")))
            .unwrap();
        dispatcher.register(Arc::new(NamedChannel(r"^users/.*$"))).unwrap();

        let (handler, _) = dispatcher.matching("users/38").unwrap();
        assert_eq!(handler.pattern(), r"^users/(?P<user_id>\w+)$");
    }

    #[test]
    fn duplicate_channel_pattern_is_rejected() {
        let dispatcher = ChannelDispatcher::default();
        dispatcher.register(Arc::new(NamedChannel(r"^users/\w+$"))).unwrap();
        let result = dispatcher.register(Arc::new(NamedChannel(r"^users/\w+$")));
        assert!(matches!(result, Err(DispatchError::DuplicateChannel(_))));
    }

    #[test]
    fn invalid_channel_pattern_is_rejected() {
        let dispatcher = ChannelDispatcher::default();
        let result = dispatcher.register(Arc::new(NamedChannel(r"^users/(unclosed$")));
        assert!(matches!(
            result,
            Err(DispatchError::InvalidChannelPattern { .. })
        ));
    }

    #[test]
    fn empty_channel_pattern_is_rejected() {
        let dispatcher = ChannelDispatcher::default();
        let result = dispatcher.register(Arc::new(NamedChannel("")));
        assert!(matches!(result, Err(DispatchError::EmptyChannelPattern)));
    }
}
