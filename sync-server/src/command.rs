//! Command pipeline: auth, action, and subscription processing.
//!
//! Every command application yields an ordered list of [`Answer`]s. For an
//! action command the pipeline is fixed: `resend` (recipient channels),
//! `access` (approved / forbidden), `process` (only when approved), then
//! `finalize`. Consumer code plugs in through [`ActionHandler`] and
//! [`ChannelHandler`]; handler failures become `error` answers instead of
//! tearing the request down.

use crate::dispatch::ChannelParams;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sync_types::{Action, Meta, Subprotocol, SupportedRange, UNDO_TYPE};
use thiserror::Error;

/// Headers forwarded with a command.
pub type Headers = Map<String, Value>;

/// Error raised by consumer handler code; rendered into `error` answers.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Consumer-provided authentication function.
///
/// Receives the full auth request (user id, token, cookie, headers) and
/// decides whether the user is authenticated. Failures become `error`
/// answers.
pub type AuthFn = dyn Fn(&AuthRequest) -> Result<bool, HandlerError> + Send + Sync;

/// An auth command.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// Correlation id echoed back in the answer.
    pub auth_id: String,
    /// The user id to authenticate.
    pub user_id: String,
    /// Optional token credential.
    #[serde(default)]
    pub token: Option<String>,
    /// Subprotocol the client was built against.
    pub subprotocol: String,
    /// Cookies forwarded from the client.
    #[serde(default)]
    pub cookie: Map<String, Value>,
    /// Headers forwarded from the client.
    #[serde(default)]
    pub headers: Map<String, Value>,
}

/// A single answer produced by applying a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "answer", rename_all = "camelCase")]
pub enum Answer {
    /// The user is authenticated.
    #[serde(rename_all = "camelCase")]
    Authenticated {
        /// Correlation id from the auth command.
        auth_id: String,
        /// Subprotocol the server is running.
        subprotocol: String,
    },

    /// The user is not authenticated.
    #[serde(rename_all = "camelCase")]
    Denied {
        /// Correlation id from the auth command.
        auth_id: String,
    },

    /// The client subprotocol falls outside the supported range.
    #[serde(rename_all = "camelCase")]
    WrongSubprotocol {
        /// Correlation id from the auth command.
        auth_id: String,
        /// The range of subprotocols the server accepts.
        supported: String,
    },

    /// Something in the command or its handlers failed.
    Error {
        /// Action id, for action command failures.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        id: Option<String>,
        /// Correlation id, for auth command failures.
        #[serde(
            rename = "authId",
            skip_serializing_if = "Option::is_none",
            default
        )]
        auth_id: Option<String>,
        /// Human-readable failure description.
        details: String,
    },

    /// Recipient channels for an action.
    Resend {
        /// The action id.
        id: String,
        /// Channels the action should be fanned out to.
        channels: Vec<String>,
    },

    /// Access check passed.
    Approved {
        /// The action id.
        id: String,
    },

    /// Access check rejected the action.
    Forbidden {
        /// The action id.
        id: String,
    },

    /// The action's business logic ran to completion.
    Processed {
        /// The action id.
        id: String,
    },

    /// An action loaded for a new channel subscriber.
    Action {
        /// Id of the subscription action that triggered the load.
        id: String,
        /// The loaded action.
        action: Action,
        /// Meta for the loaded action, targeted at the subscriber.
        meta: Map<String, Value>,
    },

    /// No handler is registered for this action type.
    UnknownAction {
        /// The action id.
        id: String,
    },

    /// No channel pattern matches this subscription.
    UnknownChannel {
        /// The action id.
        id: String,
    },
}

/// Handler for one action type.
///
/// `access` is required; `resend`, `process`, and `finalize` default to
/// no-ops.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The action type this handler serves, e.g. `users/rename`.
    fn action_type(&self) -> &str;

    /// Permission check. Runs before `process`; a `false` or an error
    /// prevents processing.
    async fn access(
        &self,
        action: &Action,
        meta: &Meta,
        headers: &Headers,
    ) -> Result<bool, HandlerError>;

    /// Recipient channels for this action.
    async fn resend(
        &self,
        _action: &Action,
        _meta: &Meta,
        _headers: &Headers,
    ) -> Result<Vec<String>, HandlerError> {
        Ok(Vec::new())
    }

    /// Business logic. Only runs when `access` approved the action.
    async fn process(
        &self,
        _action: &Action,
        _meta: &Meta,
        _headers: &Headers,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Runs at the end of the pipeline regardless of earlier outcomes.
    async fn finalize(
        &self,
        _action: &Action,
        _meta: &Meta,
        _headers: &Headers,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// One action loaded for a new channel subscriber.
#[derive(Debug, Clone)]
pub struct LoadedAction {
    /// The action to deliver.
    pub action: Action,
    /// Extra meta keys merged over the subscriber targeting.
    pub meta: Map<String, Value>,
}

impl LoadedAction {
    /// Load an action with no extra meta.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            meta: Map::new(),
        }
    }

    /// Load an action with extra meta keys.
    pub fn with_meta(action: Action, meta: Map<String, Value>) -> Self {
        Self { action, meta }
    }
}

/// Handler for one channel pattern.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Regex the channel name must match; named captures become params.
    fn pattern(&self) -> &str;

    /// Permission check for the subscription.
    async fn access(
        &self,
        action: &Action,
        meta: &Meta,
        params: &ChannelParams,
        headers: &Headers,
    ) -> Result<bool, HandlerError>;

    /// Actions bringing the new subscriber up to date.
    async fn load(
        &self,
        action: &Action,
        meta: &Meta,
        params: &ChannelParams,
        headers: &Headers,
    ) -> Result<Vec<LoadedAction>, HandlerError>;
}

/// A parsed action command ready to run through the pipeline.
#[derive(Debug, Clone)]
pub struct ActionCommand {
    /// The action payload.
    pub action: Action,
    /// Parsed meta record.
    pub meta: Meta,
    /// Headers forwarded with the command.
    pub headers: Headers,
}

/// Apply an auth command.
pub fn apply_auth(
    request: &AuthRequest,
    auth: Option<&AuthFn>,
    subprotocol: &Subprotocol,
    supports: &SupportedRange,
) -> Vec<Answer> {
    let client_subprotocol: Subprotocol = match request.subprotocol.parse() {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "wrong subprotocol format in auth command");
            return vec![Answer::Error {
                id: None,
                auth_id: Some(request.auth_id.clone()),
                details: format!("wrong subprotocol format: {e}"),
            }];
        }
    };

    if !supports.matches(&client_subprotocol) {
        tracing::warn!(
            client = %client_subprotocol,
            expected = %supports,
            "unsupported subprotocol version"
        );
        return vec![Answer::WrongSubprotocol {
            auth_id: request.auth_id.clone(),
            supported: supports.to_string(),
        }];
    }

    let Some(auth) = auth else {
        tracing::warn!("auth command received but no auth function configured");
        return vec![Answer::Error {
            id: None,
            auth_id: Some(request.auth_id.clone()),
            details: "no auth function configured".to_string(),
        }];
    };

    match auth(request) {
        Ok(true) => vec![Answer::Authenticated {
            auth_id: request.auth_id.clone(),
            subprotocol: subprotocol.to_string(),
        }],
        Ok(false) => vec![Answer::Denied {
            auth_id: request.auth_id.clone(),
        }],
        Err(e) => {
            tracing::warn!(error = %e, "auth function failed");
            vec![Answer::Error {
                id: None,
                auth_id: Some(request.auth_id.clone()),
                details: e.to_string(),
            }]
        }
    }
}

/// Run an action command through the pipeline.
pub async fn apply_action(command: &ActionCommand, handler: &dyn ActionHandler) -> Vec<Answer> {
    let id = command.meta.id().raw().to_string();
    let mut answers = Vec::new();

    let channels = match handler
        .resend(&command.action, &command.meta, &command.headers)
        .await
    {
        Ok(channels) => channels,
        Err(e) => {
            answers.push(Answer::Error {
                id: Some(id),
                auth_id: None,
                details: e.to_string(),
            });
            return answers;
        }
    };
    answers.push(Answer::Resend {
        id: id.clone(),
        channels,
    });

    let approved = match handler
        .access(&command.action, &command.meta, &command.headers)
        .await
    {
        Ok(true) => {
            answers.push(Answer::Approved { id: id.clone() });
            true
        }
        Ok(false) => {
            answers.push(Answer::Forbidden { id: id.clone() });
            false
        }
        Err(e) => {
            answers.push(Answer::Error {
                id: Some(id.clone()),
                auth_id: None,
                details: e.to_string(),
            });
            false
        }
    };

    if approved {
        match handler
            .process(&command.action, &command.meta, &command.headers)
            .await
        {
            Ok(()) => answers.push(Answer::Processed { id: id.clone() }),
            Err(e) => answers.push(Answer::Error {
                id: Some(id.clone()),
                auth_id: None,
                details: e.to_string(),
            }),
        }
    }

    if let Err(e) = handler
        .finalize(&command.action, &command.meta, &command.headers)
        .await
    {
        answers.push(Answer::Error {
            id: Some(id),
            auth_id: None,
            details: e.to_string(),
        });
    }

    answers
}

/// Run a subscription command through the pipeline.
///
/// A `processed` answer is always emitted last, even after a load failure.
pub async fn apply_subscribe(
    command: &ActionCommand,
    handler: &dyn ChannelHandler,
    params: &ChannelParams,
) -> Vec<Answer> {
    let id = command.meta.id().raw().to_string();
    let mut answers = Vec::new();

    let approved = match handler
        .access(&command.action, &command.meta, params, &command.headers)
        .await
    {
        Ok(true) => {
            answers.push(Answer::Approved { id: id.clone() });
            true
        }
        Ok(false) => {
            answers.push(Answer::Forbidden { id: id.clone() });
            false
        }
        Err(e) => {
            answers.push(Answer::Error {
                id: Some(id.clone()),
                auth_id: None,
                details: e.to_string(),
            });
            false
        }
    };

    if approved {
        match handler
            .load(&command.action, &command.meta, params, &command.headers)
            .await
        {
            Ok(loaded) => {
                for entry in loaded {
                    // Target the loaded action at the subscribing client;
                    // handler-supplied meta keys win on conflict.
                    let mut meta = Map::new();
                    meta.insert(
                        "clients".to_string(),
                        Value::from(vec![command.meta.client_id().to_string()]),
                    );
                    meta.extend(entry.meta);
                    answers.push(Answer::Action {
                        id: id.clone(),
                        action: entry.action,
                        meta,
                    });
                }
            }
            Err(e) => answers.push(Answer::Error {
                id: Some(id.clone()),
                auth_id: None,
                details: e.to_string(),
            }),
        }
    }

    answers.push(Answer::Processed { id });
    answers
}

/// The single answer for an action type without a handler.
pub fn unknown_action(meta: &Meta) -> Vec<Answer> {
    vec![Answer::UnknownAction {
        id: meta.id().raw().to_string(),
    }]
}

/// The single answer for a subscription without a matching channel.
pub fn unknown_channel(meta: &Meta) -> Vec<Answer> {
    vec![Answer::UnknownChannel {
        id: meta.id().raw().to_string(),
    }]
}

/// Build the revert action for a rejected or failed action.
///
/// Preserves the original meta's routing keys, adds the originating
/// client, and drops absent keys.
pub fn undo_action(
    meta: &Meta,
    reason: &str,
    extra: Map<String, Value>,
) -> (Action, Map<String, Value>) {
    let mut action = Action::new(UNDO_TYPE)
        .with_field("id", meta.id().raw())
        .with_field("reason", reason);
    for (key, value) in extra {
        action.fields.insert(key, value);
    }

    let mut undo_meta = Map::new();
    undo_meta.insert("status".to_string(), Value::from("processed"));
    for key in ["users", "nodes", "reasons", "channels"] {
        if let Some(value) = meta.get(key) {
            undo_meta.insert(key.to_string(), value.clone());
        }
    }
    let mut clients = meta
        .get("clients")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    clients.push(Value::from(meta.client_id()));
    undo_meta.insert("clients".to_string(), Value::Array(clients));

    (action, undo_meta)
}
