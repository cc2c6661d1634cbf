//! Control request parsing and application.
//!
//! A control request carries the wire protocol version, the shared
//! secret, and a list of commands. Version and secret are checked before
//! any command runs; every surviving command yields at least one answer,
//! flattened in request order.

use crate::command::{self, ActionCommand, Answer, AuthRequest};
use crate::server::Server;
use serde::Deserialize;
use serde_json::Value;
use sync_types::{protocol_version_is_supported, Action, Meta};
use thiserror::Error;

/// Deserialized control-endpoint request.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequest {
    /// Wire protocol version of the producer.
    pub version: u32,
    /// Shared control secret.
    pub secret: String,
    /// Raw commands, parsed individually so one bad command cannot take
    /// the whole request down.
    #[serde(default)]
    pub commands: Vec<Value>,
}

/// Why a control request was rejected before command application.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlReject {
    /// The producer speaks an incompatible wire protocol version.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// The shared secret did not match.
    #[error("wrong secret")]
    WrongSecret,
}

impl ControlRequest {
    /// Validate the request and apply all commands in order.
    pub async fn apply(&self, server: &Server) -> Result<Vec<Answer>, ControlReject> {
        if !protocol_version_is_supported(self.version) {
            return Err(ControlReject::UnsupportedVersion(self.version));
        }
        let secret_ok =
            server.options().control_secret.as_deref() == Some(self.secret.as_str());
        if !secret_ok {
            return Err(ControlReject::WrongSecret);
        }

        if self.commands.is_empty() {
            return Ok(vec![Answer::Error {
                id: None,
                auth_id: None,
                details: "command list is empty".to_string(),
            }]);
        }

        let mut answers = Vec::new();
        for raw in &self.commands {
            answers.extend(apply_raw_command(server, raw).await);
        }
        Ok(answers)
    }
}

async fn apply_raw_command(server: &Server, raw: &Value) -> Vec<Answer> {
    let Some(kind) = raw.get("command").and_then(Value::as_str) else {
        tracing::warn!(command = %raw, "command without type will be ignored");
        return Vec::new();
    };

    match kind {
        "auth" => match serde_json::from_value::<AuthRequest>(raw.clone()) {
            Ok(request) => {
                tracing::debug!(auth_id = %request.auth_id, "got auth command");
                command::apply_auth(
                    &request,
                    server.auth_fn().as_deref(),
                    server.subprotocol(),
                    server.supports(),
                )
            }
            Err(e) => vec![Answer::Error {
                id: None,
                auth_id: raw
                    .get("authId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                details: format!("bad auth command: {e}"),
            }],
        },
        "action" => apply_action_command(server, raw).await,
        other => {
            tracing::warn!(command_type = %other, "wrong command type will be ignored");
            Vec::new()
        }
    }
}

async fn apply_action_command(server: &Server, raw: &Value) -> Vec<Answer> {
    let action: Action = match raw.get("action").cloned().map(serde_json::from_value) {
        Some(Ok(action)) => action,
        Some(Err(e)) => {
            return vec![Answer::Error {
                id: None,
                auth_id: None,
                details: format!("bad action: {e}"),
            }]
        }
        None => {
            return vec![Answer::Error {
                id: None,
                auth_id: None,
                details: "action command without action".to_string(),
            }]
        }
    };

    let meta = match raw.get("meta").cloned() {
        Some(value) => match Meta::from_value(value) {
            Ok(meta) => meta,
            Err(e) => {
                return vec![Answer::Error {
                    id: None,
                    auth_id: None,
                    details: format!("bad meta: {e}"),
                }]
            }
        },
        None => {
            return vec![Answer::Error {
                id: None,
                auth_id: None,
                details: "action command without meta".to_string(),
            }]
        }
    };

    let headers = raw
        .get("headers")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let cmd = ActionCommand {
        action,
        meta,
        headers,
    };

    if cmd.action.is_subscribe() {
        let Some(channel) = cmd.action.channel() else {
            return vec![Answer::Error {
                id: Some(cmd.meta.id().raw().to_string()),
                auth_id: None,
                details: "subscribe action without channel".to_string(),
            }];
        };
        tracing::debug!(%channel, "got subscription");
        return match server.channels().matching(channel) {
            Some((handler, params)) => {
                command::apply_subscribe(&cmd, handler.as_ref(), &params).await
            }
            None => command::unknown_channel(&cmd.meta),
        };
    }

    let Some(handler) = server.actions().get(&cmd.action.kind) else {
        tracing::warn!(action_type = %cmd.action.kind, "unknown action");
        return command::unknown_action(&cmd.meta);
    };

    let answers = command::apply_action(&cmd, handler.as_ref()).await;

    // Processed actions reach subscribed clients and the log, just like
    // actions arriving over a session.
    if answers
        .iter()
        .any(|answer| matches!(answer, Answer::Processed { .. }))
    {
        let channels = answers
            .iter()
            .find_map(|answer| match answer {
                Answer::Resend { channels, .. } => Some(channels.clone()),
                _ => None,
            })
            .unwrap_or_default();
        server.commit_action(&cmd.action, &cmd.meta, &channels, None);
    }

    answers
}
