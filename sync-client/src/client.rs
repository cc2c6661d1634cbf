//! The sync client: options, lifecycle, and the connection task.
//!
//! A [`Client`] is constructed with [`ClientOptions`] and a transport,
//! usually through [`StoreCreator`](crate::StoreCreator). `start()` is
//! fire-and-forget: it spawns the connection task and returns immediately;
//! the outcome is observable only through state-change events.

use crate::state::{reconnect_delay, ClientState};
use crate::transport::{Transport, TransportError};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use sync_types::{Action, Frame, PROTOCOL_VERSION};
use thiserror::Error;
use tokio::sync::mpsc;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// `start()` was called a second time.
    #[error("client already started")]
    AlreadyStarted,

    /// The connection task has terminated; no more actions can be queued.
    #[error("client stopped")]
    Stopped,
}

/// Synchronization settings for one client, built once at bootstrap.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Application subprotocol this client was built against.
    pub subprotocol: String,
    /// Server endpoint URL, e.g. `ws://localhost:31337`.
    pub server: String,
    /// User identity; `None` for anonymous clients.
    pub user_id: Option<String>,
    /// Opaque credential string; may be empty.
    pub credentials: String,
}

type StateListener = Box<dyn Fn(&ClientState) + Send + Sync>;
type ActionListener = Box<dyn Fn(&Action) + Send + Sync>;
type QueuedAction = (Action, Map<String, Value>);

/// The sync client.
///
/// Owns the transport and the outgoing action queue. Actions queued before
/// or during an outage are flushed once a connection is established.
pub struct Client<T: Transport> {
    options: ClientOptions,
    node_id: String,
    transport: Arc<T>,
    state: Arc<Mutex<ClientState>>,
    state_listeners: Arc<Mutex<Vec<StateListener>>>,
    action_listeners: Arc<Mutex<Vec<ActionListener>>>,
    outgoing_tx: mpsc::UnboundedSender<QueuedAction>,
    outgoing_rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedAction>>>,
    counter: AtomicU64,
    started: AtomicBool,
}

impl<T: Transport> Client<T> {
    /// Create a new client with the given options and transport.
    pub fn new(options: ClientOptions, transport: T) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let user = options.user_id.as_deref().unwrap_or("anonymous");
        let node_id = format!("{user}:{}", random_segment());

        Self {
            options,
            node_id,
            transport: Arc::new(transport),
            state: Arc::new(Mutex::new(ClientState::Disconnected)),
            state_listeners: Arc::new(Mutex::new(Vec::new())),
            action_listeners: Arc::new(Mutex::new(Vec::new())),
            outgoing_tx,
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            counter: AtomicU64::new(0),
            started: AtomicBool::new(false),
        }
    }

    /// The options this client was configured with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The unique node id of this client, embedded into action ids.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Current connection state.
    pub fn state(&self) -> ClientState {
        self.state.lock().unwrap().clone()
    }

    /// Register a callback invoked on every state transition.
    pub fn on_state_change(&self, listener: impl Fn(&ClientState) + Send + Sync + 'static) {
        self.state_listeners
            .lock()
            .unwrap()
            .push(Box::new(listener));
    }

    /// Register a callback invoked for every action received from the
    /// server.
    pub fn on_action(&self, listener: impl Fn(&Action) + Send + Sync + 'static) {
        self.action_listeners
            .lock()
            .unwrap()
            .push(Box::new(listener));
    }

    /// Queue an action for synchronization.
    ///
    /// Generates a meta record with a fresh action id and the configured
    /// subprotocol. The action is sent as soon as a connection is up.
    pub fn add(&self, action: Action) -> Result<(), ClientError> {
        let meta = self.new_meta();
        self.outgoing_tx
            .send((action, meta))
            .map_err(|_| ClientError::Stopped)
    }

    /// Start the connection task.
    ///
    /// Returns immediately; connection progress is reported through state
    /// events. May be called at most once per client.
    pub fn start(&self) -> Result<(), ClientError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyStarted);
        }
        let outgoing = self
            .outgoing_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(ClientError::Stopped)?;

        let connection = Connection {
            options: self.options.clone(),
            node_id: self.node_id.clone(),
            transport: self.transport.clone(),
            state: self.state.clone(),
            state_listeners: self.state_listeners.clone(),
            action_listeners: self.action_listeners.clone(),
        };
        tokio::spawn(connection.run(outgoing));
        Ok(())
    }

    fn new_meta(&self) -> Map<String, Value> {
        let time = now_ms();
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut meta = Map::new();
        meta.insert(
            "id".into(),
            Value::from(format!("{time} {} {counter}", self.node_id)),
        );
        meta.insert("time".into(), Value::from(time));
        meta.insert(
            "subprotocol".into(),
            Value::from(self.options.subprotocol.clone()),
        );
        meta
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn random_segment() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(6);
    id
}

/// Handshake outcome that should stop the client instead of retrying.
enum HandshakeError {
    Transport(TransportError),
    Rejected(String),
}

impl From<TransportError> for HandshakeError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// State shared with the spawned connection task.
struct Connection<T: Transport> {
    options: ClientOptions,
    node_id: String,
    transport: Arc<T>,
    state: Arc<Mutex<ClientState>>,
    state_listeners: Arc<Mutex<Vec<StateListener>>>,
    action_listeners: Arc<Mutex<Vec<ActionListener>>>,
}

impl<T: Transport> Connection<T> {
    fn set_state(&self, next: ClientState) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == next {
                return;
            }
            *state = next.clone();
        }
        for listener in self.state_listeners.lock().unwrap().iter() {
            listener(&next);
        }
    }

    fn deliver(&self, action: &Action) {
        for listener in self.action_listeners.lock().unwrap().iter() {
            listener(action);
        }
    }

    async fn run(self, mut outgoing: mpsc::UnboundedReceiver<QueuedAction>) {
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                tokio::time::sleep(reconnect_delay(attempt)).await;
            }
            self.set_state(ClientState::Connecting);

            if let Err(e) = self.transport.connect(&self.options.server).await {
                tracing::warn!(server = %self.options.server, error = %e, "connection failed");
                attempt = attempt.saturating_add(1);
                self.set_state(ClientState::Reconnecting { attempt });
                continue;
            }

            match self.handshake().await {
                Ok(()) => {
                    attempt = 0;
                    self.set_state(ClientState::Synchronized);
                }
                Err(HandshakeError::Rejected(reason)) => {
                    // The server will keep rejecting the same handshake, so
                    // retrying would loop forever.
                    tracing::error!(%reason, "server rejected connection");
                    let _ = self.transport.close().await;
                    self.set_state(ClientState::Disconnected);
                    return;
                }
                Err(HandshakeError::Transport(e)) => {
                    tracing::warn!(error = %e, "handshake failed");
                    attempt = attempt.saturating_add(1);
                    self.set_state(ClientState::Reconnecting { attempt });
                    continue;
                }
            }

            loop {
                tokio::select! {
                    queued = outgoing.recv() => match queued {
                        Some((action, meta)) => {
                            self.set_state(ClientState::Sending);
                            let frame = Frame::Action { action, meta };
                            if let Err(e) = self.transport.send(&frame).await {
                                tracing::warn!(error = %e, "send failed");
                                attempt = 1;
                                self.set_state(ClientState::Reconnecting { attempt });
                                break;
                            }
                        }
                        None => {
                            // Client dropped; shut the connection down.
                            let _ = self.transport.close().await;
                            self.set_state(ClientState::Disconnected);
                            return;
                        }
                    },
                    incoming = self.transport.recv() => match incoming {
                        Ok(Frame::Action { action, meta: _ }) => self.deliver(&action),
                        Ok(Frame::Synced { id }) => {
                            tracing::debug!(%id, "action processed by server");
                            self.set_state(ClientState::Synchronized);
                        }
                        Ok(Frame::Ping) => {
                            let _ = self.transport.send(&Frame::Pong).await;
                        }
                        Ok(Frame::Error { details }) => {
                            tracing::error!(%details, "server reported error");
                        }
                        Ok(other) => {
                            tracing::debug!(frame = ?other, "ignoring unexpected frame");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "connection lost");
                            attempt = 1;
                            self.set_state(ClientState::Reconnecting { attempt });
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handshake(&self) -> Result<(), HandshakeError> {
        let connect = Frame::Connect {
            protocol: PROTOCOL_VERSION,
            subprotocol: self.options.subprotocol.clone(),
            node_id: self.node_id.clone(),
            user_id: self.options.user_id.clone(),
            credentials: self.options.credentials.clone(),
        };
        self.transport.send(&connect).await?;

        match self.transport.recv().await? {
            Frame::Connected { subprotocol } => {
                tracing::debug!(server_subprotocol = %subprotocol, "connected");
                Ok(())
            }
            Frame::Denied => Err(HandshakeError::Rejected("credentials denied".into())),
            Frame::WrongSubprotocol { supported } => Err(HandshakeError::Rejected(format!(
                "unsupported subprotocol, server supports {supported}"
            ))),
            Frame::Error { details } => Err(HandshakeError::Rejected(details)),
            other => Err(HandshakeError::Rejected(format!(
                "unexpected handshake reply: {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::time::Duration;

    fn test_options() -> ClientOptions {
        ClientOptions {
            subprotocol: "1.0.0".into(),
            server: "ws://localhost:31337".into(),
            user_id: None,
            credentials: String::new(),
        }
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn start_connects_and_synchronizes() {
        let transport = MockTransport::new();
        transport.queue_frame(Frame::Connected {
            subprotocol: "1.0.0".into(),
        });
        let client = Client::new(test_options(), transport.clone());

        assert_eq!(client.state(), ClientState::Disconnected);
        client.start().unwrap();

        wait_until("synchronized", || {
            client.state() == ClientState::Synchronized
        })
        .await;
        assert_eq!(
            transport.connected_url(),
            Some("ws://localhost:31337".to_string())
        );
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let transport = MockTransport::new();
        transport.queue_frame(Frame::Connected {
            subprotocol: "1.0.0".into(),
        });
        let client = Client::new(test_options(), transport);

        client.start().unwrap();
        assert!(matches!(client.start(), Err(ClientError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn handshake_sends_configured_options() {
        let transport = MockTransport::new();
        transport.queue_frame(Frame::Connected {
            subprotocol: "1.0.0".into(),
        });
        let options = ClientOptions {
            user_id: Some("38".into()),
            credentials: "secret".into(),
            ..test_options()
        };
        let client = Client::new(options, transport.clone());
        client.start().unwrap();

        wait_until("connect frame", || !transport.sent_frames().is_empty()).await;
        match &transport.sent_frames()[0] {
            Frame::Connect {
                protocol,
                subprotocol,
                node_id,
                user_id,
                credentials,
            } => {
                assert_eq!(*protocol, PROTOCOL_VERSION);
                assert_eq!(subprotocol, "1.0.0");
                assert!(node_id.starts_with("38:"));
                assert_eq!(user_id.as_deref(), Some("38"));
                assert_eq!(credentials, "secret");
            }
            other => panic!("expected Connect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn denied_handshake_stops_the_client() {
        let transport = MockTransport::new();
        transport.queue_frame(Frame::Denied);
        let client = Client::new(test_options(), transport);
        client.start().unwrap();

        wait_until("disconnected", || {
            client.state() == ClientState::Disconnected
        })
        .await;
    }

    #[tokio::test]
    async fn wrong_subprotocol_stops_the_client() {
        let transport = MockTransport::new();
        transport.queue_frame(Frame::WrongSubprotocol {
            supported: "2.x".into(),
        });
        let client = Client::new(test_options(), transport);
        client.start().unwrap();

        wait_until("disconnected", || {
            client.state() == ClientState::Disconnected
        })
        .await;
    }

    #[tokio::test]
    async fn queued_actions_flush_after_connect() {
        let transport = MockTransport::new();
        transport.queue_frame(Frame::Connected {
            subprotocol: "1.0.0".into(),
        });
        let client = Client::new(test_options(), transport.clone());

        // Queued before start: must survive until the connection is up.
        client.add(Action::new("counter/add")).unwrap();
        client.start().unwrap();

        wait_until("action frame", || transport.sent_frames().len() >= 2).await;
        match &transport.sent_frames()[1] {
            Frame::Action { action, meta } => {
                assert_eq!(action.kind, "counter/add");
                let meta = sync_types::Meta::from_raw(meta.clone()).unwrap();
                assert_eq!(meta.id().counter(), 0);
                assert_eq!(meta.subprotocol(), Some("1.0.0"));
            }
            other => panic!("expected Action, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn generated_ids_are_unique_and_parseable() {
        let transport = MockTransport::new();
        transport.queue_frame(Frame::Connected {
            subprotocol: "1.0.0".into(),
        });
        let client = Client::new(test_options(), transport.clone());
        client.add(Action::new("a")).unwrap();
        client.add(Action::new("b")).unwrap();
        client.start().unwrap();

        wait_until("two action frames", || transport.sent_frames().len() >= 3).await;
        let ids: Vec<String> = transport.sent_frames()[1..]
            .iter()
            .map(|frame| match frame {
                Frame::Action { meta, .. } => sync_types::Meta::from_raw(meta.clone())
                    .unwrap()
                    .id()
                    .raw()
                    .to_string(),
                other => panic!("expected Action, got {other:?}"),
            })
            .collect();
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn incoming_actions_reach_listeners() {
        let transport = MockTransport::new();
        transport.queue_frame(Frame::Connected {
            subprotocol: "1.0.0".into(),
        });
        let client = Client::new(test_options(), transport.clone());

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        client.on_action(move |action| sink.lock().unwrap().push(action.kind.clone()));
        client.start().unwrap();

        wait_until("synchronized", || {
            client.state() == ClientState::Synchronized
        })
        .await;
        transport.queue_frame(Frame::Action {
            action: Action::new("users/rename"),
            meta: Map::new(),
        });

        wait_until("action delivered", || !received.lock().unwrap().is_empty()).await;
        assert_eq!(received.lock().unwrap()[0], "users/rename");
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let transport = MockTransport::new();
        transport.queue_frame(Frame::Connected {
            subprotocol: "1.0.0".into(),
        });
        let client = Client::new(test_options(), transport.clone());
        client.start().unwrap();

        wait_until("synchronized", || {
            client.state() == ClientState::Synchronized
        })
        .await;
        transport.queue_frame(Frame::Ping);

        wait_until("pong", || transport.sent_frames().contains(&Frame::Pong)).await;
    }

    #[tokio::test]
    async fn state_listeners_observe_connect_sequence() {
        let transport = MockTransport::new();
        transport.queue_frame(Frame::Connected {
            subprotocol: "1.0.0".into(),
        });
        let client = Client::new(test_options(), transport);

        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        client.on_state_change(move |state| sink.lock().unwrap().push(state.clone()));
        client.start().unwrap();

        wait_until("two transitions", || states.lock().unwrap().len() >= 2).await;
        let seen = states.lock().unwrap().clone();
        assert_eq!(
            &seen[..2],
            &[ClientState::Connecting, ClientState::Synchronized]
        );
    }

    #[tokio::test]
    async fn failed_connect_schedules_reconnect() {
        let transport = MockTransport::new();
        transport.fail_next_connect("network unreachable");
        transport.queue_frame(Frame::Connected {
            subprotocol: "1.0.0".into(),
        });
        let client = Client::new(test_options(), transport);
        client.start().unwrap();

        // First attempt fails, backoff runs, second attempt succeeds.
        wait_until("synchronized after retry", || {
            client.state() == ClientState::Synchronized
        })
        .await;
    }
}
