//! WebSocket session handling.
//!
//! Each connection performs the handshake (wire protocol version,
//! subprotocol range, optional auth), registers a session, then serves
//! the action loop: every incoming action runs through the command
//! pipeline; processed actions are committed and confirmed with a synced
//! frame, rejected ones come back as `sync/undo`.

use crate::command::{self, ActionCommand, Answer, AuthRequest};
use crate::error::ProtocolError;
use crate::server::{Server, Session};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::Extension;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Map;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use sync_types::{protocol_version_is_supported, Frame, Meta, Subprotocol};
use tokio::sync::mpsc;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Upgrade handler for the WebSocket listener.
pub async fn ws_handler(
    Extension(server): Extension<Arc<Server>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = run(server, socket).await {
            tracing::debug!(error = %e, "session ended with error");
        }
    })
}

async fn run(server: Arc<Server>, socket: WebSocket) -> Result<(), ProtocolError> {
    server
        .metrics()
        .connections_total
        .fetch_add(1, Ordering::Relaxed);
    let (mut sink, mut stream) = socket.split();

    let timeout = Duration::from_secs(server.options().handshake_timeout_secs);
    let first = tokio::time::timeout(timeout, next_frame(&mut stream))
        .await
        .map_err(|_| ProtocolError::HandshakeTimeout)??;

    let Frame::Connect {
        protocol,
        subprotocol,
        node_id,
        user_id,
        credentials,
    } = first
    else {
        send_frame(
            &mut sink,
            &Frame::Error {
                details: "expected connect frame".to_string(),
            },
        )
        .await?;
        return Err(ProtocolError::UnexpectedFrame(format!("{first:?}")));
    };

    if !protocol_version_is_supported(protocol) {
        send_frame(
            &mut sink,
            &Frame::Error {
                details: format!("unsupported protocol version: {protocol}"),
            },
        )
        .await?;
        return Ok(());
    }

    let in_range = subprotocol
        .parse::<Subprotocol>()
        .map(|parsed| server.supports().matches(&parsed))
        .unwrap_or(false);
    if !in_range {
        tracing::warn!(
            client = %subprotocol,
            expected = %server.supports(),
            "unsupported subprotocol version"
        );
        send_frame(
            &mut sink,
            &Frame::WrongSubprotocol {
                supported: server.supports().to_string(),
            },
        )
        .await?;
        return Ok(());
    }

    if let Some(auth) = server.auth_fn() {
        let request = AuthRequest {
            auth_id: node_id.clone(),
            user_id: user_id.clone().unwrap_or_default(),
            token: (!credentials.is_empty()).then(|| credentials.clone()),
            subprotocol,
            cookie: Map::new(),
            headers: Map::new(),
        };
        match auth(&request) {
            Ok(true) => {}
            Ok(false) => {
                server
                    .metrics()
                    .auth_denied_total
                    .fetch_add(1, Ordering::Relaxed);
                send_frame(&mut sink, &Frame::Denied).await?;
                return Ok(());
            }
            Err(e) => {
                send_frame(
                    &mut sink,
                    &Frame::Error {
                        details: e.to_string(),
                    },
                )
                .await?;
                return Ok(());
            }
        }
    }

    send_frame(
        &mut sink,
        &Frame::Connected {
            subprotocol: server.subprotocol().to_string(),
        },
    )
    .await?;

    // Outgoing frames are funneled through a channel so broadcasts from
    // other sessions can reach this socket.
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let client_id = client_id_of(&node_id);
    let session = Arc::new(Session {
        node_id,
        user_id,
        sender,
        subscriptions: RwLock::new(HashSet::new()),
    });
    server.register_session(&client_id, session.clone());
    tracing::info!(%client_id, "client connected");

    let result = serve(
        &server,
        &session,
        &client_id,
        &mut sink,
        &mut stream,
        &mut receiver,
    )
    .await;
    server.unregister_session(&client_id);
    tracing::info!(%client_id, "client disconnected");
    result
}

async fn serve(
    server: &Arc<Server>,
    session: &Arc<Session>,
    client_id: &str,
    sink: &mut WsSink,
    stream: &mut WsStream,
    receiver: &mut mpsc::UnboundedReceiver<Frame>,
) -> Result<(), ProtocolError> {
    loop {
        tokio::select! {
            outgoing = receiver.recv() => match outgoing {
                Some(frame) => send_frame(sink, &frame).await?,
                None => return Ok(()),
            },
            incoming = next_frame(stream) => {
                let frame = match incoming {
                    Ok(frame) => frame,
                    Err(ProtocolError::ConnectionClosed) => return Ok(()),
                    Err(e) => return Err(e),
                };
                match frame {
                    Frame::Action { action, meta } => {
                        handle_action(server, session, client_id, sink, action, meta).await?;
                    }
                    Frame::Ping => send_frame(sink, &Frame::Pong).await?,
                    Frame::Pong => {}
                    other => {
                        tracing::debug!(frame = ?other, "ignoring unexpected frame");
                    }
                }
            }
        }
    }
}

async fn handle_action(
    server: &Arc<Server>,
    session: &Arc<Session>,
    client_id: &str,
    sink: &mut WsSink,
    action: sync_types::Action,
    raw_meta: Map<String, serde_json::Value>,
) -> Result<(), ProtocolError> {
    if !server.limits().check_action(client_id) {
        server
            .metrics()
            .rate_limit_hits
            .fetch_add(1, Ordering::Relaxed);
        send_frame(
            sink,
            &Frame::Error {
                details: "rate limit exceeded".to_string(),
            },
        )
        .await?;
        return Ok(());
    }

    let meta = match Meta::from_raw(raw_meta) {
        Ok(meta) => meta,
        Err(e) => {
            send_frame(
                sink,
                &Frame::Error {
                    details: format!("invalid meta: {e}"),
                },
            )
            .await?;
            return Ok(());
        }
    };
    let cmd = ActionCommand {
        action,
        meta,
        headers: Map::new(),
    };

    if cmd.action.is_subscribe() {
        let answers = match cmd.action.channel() {
            Some(channel) => match server.channels().matching(channel) {
                Some((handler, params)) => {
                    command::apply_subscribe(&cmd, handler.as_ref(), &params).await
                }
                None => command::unknown_channel(&cmd.meta),
            },
            None => vec![Answer::Error {
                id: Some(cmd.meta.id().raw().to_string()),
                auth_id: None,
                details: "subscribe action without channel".to_string(),
            }],
        };
        deliver_subscribe_answers(server, session, client_id, sink, &cmd, answers).await
    } else {
        let answers = match server.actions().get(&cmd.action.kind) {
            Some(handler) => command::apply_action(&cmd, handler.as_ref()).await,
            None => {
                tracing::warn!(action_type = %cmd.action.kind, "unknown action");
                command::unknown_action(&cmd.meta)
            }
        };
        deliver_action_answers(server, client_id, sink, &cmd, answers).await
    }
}

/// Render action pipeline answers onto the wire: committed actions get a
/// synced confirmation, rejections an undo.
async fn deliver_action_answers(
    server: &Arc<Server>,
    client_id: &str,
    sink: &mut WsSink,
    cmd: &ActionCommand,
    answers: Vec<Answer>,
) -> Result<(), ProtocolError> {
    let mut channels = Vec::new();
    for answer in answers {
        match answer {
            Answer::Resend {
                channels: resend, ..
            } => channels = resend,
            Answer::Approved { .. } => {}
            Answer::Processed { id } => {
                server.commit_action(&cmd.action, &cmd.meta, &channels, Some(client_id));
                send_frame(sink, &Frame::Synced { id }).await?;
            }
            Answer::Forbidden { .. } => {
                send_undo(sink, cmd, "denied").await?;
            }
            Answer::Error { details, .. } => {
                server.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%details, id = %cmd.meta.id(), "action failed");
                send_undo(sink, cmd, "error").await?;
            }
            Answer::UnknownAction { .. } => {
                send_undo(sink, cmd, "unknownType").await?;
            }
            other => {
                tracing::debug!(answer = ?other, "unexpected action answer");
            }
        }
    }
    Ok(())
}

/// Render subscription answers: record the subscription, replay loaded
/// actions, confirm with synced.
async fn deliver_subscribe_answers(
    server: &Arc<Server>,
    session: &Arc<Session>,
    client_id: &str,
    sink: &mut WsSink,
    cmd: &ActionCommand,
    answers: Vec<Answer>,
) -> Result<(), ProtocolError> {
    for answer in answers {
        match answer {
            Answer::Approved { .. } => {
                if let Some(channel) = cmd.action.channel() {
                    session
                        .subscriptions
                        .write()
                        .unwrap()
                        .insert(channel.to_string());
                    tracing::debug!(%client_id, %channel, "subscribed");
                }
            }
            Answer::Action { action, meta, .. } => {
                send_frame(sink, &Frame::Action { action, meta }).await?;
            }
            Answer::Processed { id } => {
                send_frame(sink, &Frame::Synced { id }).await?;
            }
            Answer::Forbidden { .. } => {
                send_undo(sink, cmd, "denied").await?;
            }
            Answer::Error { details, .. } => {
                server.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%details, id = %cmd.meta.id(), "subscription failed");
                send_undo(sink, cmd, "error").await?;
            }
            Answer::UnknownChannel { .. } => {
                send_undo(sink, cmd, "unknownChannel").await?;
            }
            other => {
                tracing::debug!(answer = ?other, "unexpected subscription answer");
            }
        }
    }
    Ok(())
}

async fn send_undo(
    sink: &mut WsSink,
    cmd: &ActionCommand,
    reason: &str,
) -> Result<(), ProtocolError> {
    let (action, meta) = command::undo_action(&cmd.meta, reason, Map::new());
    send_frame(sink, &Frame::Action { action, meta }).await
}

async fn next_frame(stream: &mut WsStream) -> Result<Frame, ProtocolError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                return Frame::from_json(&text)
                    .map_err(|e| ProtocolError::InvalidFrame(e.to_string()));
            }
            // WebSocket-level keepalives are answered by the stack.
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Err(ProtocolError::ConnectionClosed),
            Some(Err(e)) => return Err(ProtocolError::InvalidFrame(e.to_string())),
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &Frame) -> Result<(), ProtocolError> {
    let json = frame
        .to_json()
        .map_err(|e| ProtocolError::InvalidFrame(e.to_string()))?;
    sink.send(Message::Text(json))
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)
}

/// Client id of a node: the user and client segments of its node id.
fn client_id_of(node_id: &str) -> String {
    let mut segments = node_id.split(':');
    match (segments.next(), segments.next()) {
        (Some(user), Some(client)) => format!("{user}:{client}"),
        _ => node_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_drops_the_node_segment() {
        assert_eq!(client_id_of("38:Y7bysd:O0ETfc"), "38:Y7bysd");
        assert_eq!(client_id_of("38:Y7bysd"), "38:Y7bysd");
        assert_eq!(client_id_of("solo"), "solo");
    }
}
