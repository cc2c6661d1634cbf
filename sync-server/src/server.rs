//! Server construction, session registry, and the listen loop.

use crate::command::{AuthFn, AuthRequest, HandlerError};
use crate::config::ServerOptions;
use crate::control;
use crate::dispatch::{ActionDispatcher, ChannelDispatcher, Dispatcher};
use crate::error::ServerError;
use crate::log::ActionLog;
use crate::session;
use crate::throttle::RateLimits;
use axum::routing::get;
use axum::{Extension, Router};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};
use sync_types::{Action, Frame, Meta, Subprotocol, SupportedRange};
use tokio::sync::mpsc;

/// Operational metrics for monitoring server activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Total WebSocket connections accepted (before handshake).
    pub connections_total: AtomicU64,
    /// Total actions committed to the log.
    pub actions_total: AtomicU64,
    /// Total denied handshakes and auth commands.
    pub auth_denied_total: AtomicU64,
    /// Total control endpoint requests.
    pub control_requests_total: AtomicU64,
    /// Total rate limit rejections (bad auth + action spam).
    pub rate_limit_hits: AtomicU64,
    /// Total error answers produced.
    pub errors_total: AtomicU64,
}

/// A connected client session.
#[derive(Debug)]
pub struct Session {
    /// Node id from the connect frame.
    pub node_id: String,
    /// User identity, when announced.
    pub user_id: Option<String>,
    /// Channel for frames bound to this client's socket.
    pub sender: mpsc::UnboundedSender<Frame>,
    /// Channels this session subscribed to.
    pub subscriptions: RwLock<HashSet<String>>,
}

impl Session {
    /// Whether this session subscribed to any of the given channels.
    pub fn subscribed_to_any(&self, channels: &[String]) -> bool {
        let subscriptions = self.subscriptions.read().unwrap();
        channels.iter().any(|channel| subscriptions.contains(channel))
    }
}

/// The sync server.
///
/// Holds the negotiated versions, the handler registries, connected
/// sessions, the action log, rate limits, and metrics.
pub struct Server {
    options: ServerOptions,
    subprotocol: Subprotocol,
    supports: SupportedRange,
    dispatcher: Dispatcher,
    auth: RwLock<Option<Arc<AuthFn>>>,
    sessions: DashMap<String, Arc<Session>>,
    log: ActionLog,
    limits: RateLimits,
    metrics: ServerMetrics,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("options", &self.options)
            .field("subprotocol", &self.subprotocol)
            .field("supports", &self.supports)
            .field("sessions_count", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Construct a server from loaded options.
    ///
    /// Fails if the configured subprotocol or supported range does not
    /// parse.
    pub fn new(options: ServerOptions) -> Result<Self, ServerError> {
        let subprotocol: Subprotocol = options.subprotocol.parse()?;
        let supports: SupportedRange = options.supports.parse()?;
        let limits = RateLimits::new(options.bad_auth_per_minute, options.actions_per_minute);

        Ok(Self {
            options,
            subprotocol,
            supports,
            dispatcher: Dispatcher::default(),
            auth: RwLock::new(None),
            sessions: DashMap::new(),
            log: ActionLog::new(),
            limits,
            metrics: ServerMetrics::default(),
        })
    }

    /// The options this server was constructed with.
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// The subprotocol this server runs.
    pub fn subprotocol(&self) -> &Subprotocol {
        &self.subprotocol
    }

    /// The range of client subprotocols this server accepts.
    pub fn supports(&self) -> &SupportedRange {
        &self.supports
    }

    /// The action handler registry.
    pub fn actions(&self) -> &ActionDispatcher {
        &self.dispatcher.actions
    }

    /// The channel handler registry.
    pub fn channels(&self) -> &ChannelDispatcher {
        &self.dispatcher.channels
    }

    /// The action log.
    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    /// The rate limiters.
    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// The operational metrics.
    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Install the authentication function.
    ///
    /// Without one, the WebSocket listener accepts all clients and
    /// control-plane auth commands answer with an error.
    pub fn set_auth(
        &self,
        auth: impl Fn(&AuthRequest) -> Result<bool, HandlerError> + Send + Sync + 'static,
    ) {
        *self.auth.write().unwrap() = Some(Arc::new(auth));
    }

    /// The installed authentication function, if any.
    pub fn auth_fn(&self) -> Option<Arc<AuthFn>> {
        self.auth.read().unwrap().clone()
    }

    /// Register a session under its client id.
    pub fn register_session(&self, client_id: &str, session: Arc<Session>) {
        self.sessions.insert(client_id.to_string(), session);
        tracing::debug!(%client_id, total = self.sessions.len(), "registered session");
    }

    /// Unregister a session.
    pub fn unregister_session(&self, client_id: &str) {
        self.sessions.remove(client_id);
        tracing::debug!(%client_id, total = self.sessions.len(), "unregistered session");
    }

    /// Number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Record a channel subscription for a connected client.
    pub fn subscribe_session(&self, client_id: &str, channel: &str) {
        if let Some(session) = self.sessions.get(client_id) {
            session
                .subscriptions
                .write()
                .unwrap()
                .insert(channel.to_string());
        }
    }

    /// Fan an action out to sessions subscribed to any of the channels.
    ///
    /// The originating client, when given, is excluded. Fire-and-forget:
    /// a session whose socket already went away is skipped.
    pub fn broadcast(
        &self,
        channels: &[String],
        origin: Option<&str>,
        action: &Action,
        meta: &Meta,
    ) {
        if channels.is_empty() {
            return;
        }
        let frame = Frame::Action {
            action: action.clone(),
            meta: meta.raw().clone(),
        };

        let mut sent = 0;
        for entry in self.sessions.iter() {
            if Some(entry.key().as_str()) == origin {
                continue;
            }
            if entry.value().subscribed_to_any(channels)
                && entry.value().sender.send(frame.clone()).is_ok()
            {
                sent += 1;
            }
        }
        tracing::debug!(?channels, sent, "broadcast action");
    }

    /// Record a processed action in the log and fan it out.
    pub fn commit_action(
        &self,
        action: &Action,
        meta: &Meta,
        channels: &[String],
        origin: Option<&str>,
    ) {
        self.log.add(action.clone(), meta.clone());
        self.metrics
            .actions_total
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.broadcast(channels, origin, action, meta);
    }

    /// Bind the WebSocket and control listeners and serve until shutdown.
    pub async fn listen(self: Arc<Self>) -> Result<(), ServerError> {
        control::init_start_time();

        let ws_app = Router::new()
            .route("/", get(session::ws_handler))
            .layer(Extension(self.clone()));
        let control_app = control::build_router(self.clone());

        let ws_addr = format!("{}:{}", self.options.host, self.options.port);
        let control_addr = format!("{}:{}", self.options.host, self.options.control_port);
        let ws_listener = tokio::net::TcpListener::bind(&ws_addr).await?;
        let control_listener = tokio::net::TcpListener::bind(&control_addr).await?;

        tracing::info!(
            %ws_addr,
            %control_addr,
            subprotocol = %self.subprotocol,
            supports = %self.supports,
            root = %self.options.root.display(),
            "listening"
        );
        if self.auth_fn().is_none() {
            tracing::warn!("no auth function configured; accepting all connections");
        }
        if self.options.control_secret.is_none() {
            tracing::warn!("no control secret configured; control commands will be rejected");
        }

        let ws = async { axum::serve(ws_listener, ws_app).await };
        let control = async { axum::serve(control_listener, control_app).await };
        tokio::try_join!(ws, control)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn test_server() -> Server {
        Server::new(ServerOptions::default()).unwrap()
    }

    fn test_session() -> (Arc<Session>, mpsc::UnboundedReceiver<Frame>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            node_id: "38:Y7bysd:O0ETfc".into(),
            user_id: Some("38".into()),
            sender,
            subscriptions: RwLock::new(HashSet::new()),
        });
        (session, receiver)
    }

    fn test_meta(id: &str) -> Meta {
        Meta::new(id, 100).unwrap()
    }

    #[test]
    fn new_rejects_bad_subprotocol() {
        let options = ServerOptions {
            subprotocol: "latest".into(),
            ..ServerOptions::default()
        };
        assert!(matches!(
            Server::new(options),
            Err(ServerError::Options(_))
        ));
    }

    #[test]
    fn new_rejects_bad_supported_range() {
        let options = ServerOptions {
            supports: "a bad range!!".into(),
            ..ServerOptions::default()
        };
        assert!(Server::new(options).is_err());
    }

    #[tokio::test]
    async fn register_and_unregister_sessions() {
        let server = test_server();
        let (session, _rx) = test_session();

        server.register_session("38:Y7bysd", session);
        assert_eq!(server.session_count(), 1);

        server.unregister_session("38:Y7bysd");
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers_only() {
        let server = test_server();

        let (subscriber, mut subscriber_rx) = test_session();
        subscriber
            .subscriptions
            .write()
            .unwrap()
            .insert("users/38".into());
        server.register_session("38:Y7bysd", subscriber);

        let (bystander, mut bystander_rx) = test_session();
        server.register_session("21:AAAAAA", bystander);

        let action = Action::new("users/rename");
        let meta = test_meta("100 38:Y7bysd 0");
        server.broadcast(&["users/38".to_string()], None, &action, &meta);

        let frame = subscriber_rx.try_recv().unwrap();
        assert!(matches!(frame, Frame::Action { .. }));
        assert!(bystander_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_excludes_origin() {
        let server = test_server();
        let (session, mut rx) = test_session();
        session
            .subscriptions
            .write()
            .unwrap()
            .insert("users/38".into());
        server.register_session("38:Y7bysd", session);

        let action = Action::new("users/rename");
        let meta = test_meta("100 38:Y7bysd 0");
        server.broadcast(&["users/38".to_string()], Some("38:Y7bysd"), &action, &meta);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn commit_action_logs_and_broadcasts() {
        let server = test_server();
        let (session, mut rx) = test_session();
        session
            .subscriptions
            .write()
            .unwrap()
            .insert("users/38".into());
        server.register_session("21:AAAAAA", session);

        let action = Action::new("users/rename");
        let meta = test_meta("100 38:Y7bysd 0");
        server.commit_action(&action, &meta, &["users/38".to_string()], None);

        assert_eq!(server.log().len(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn subscribe_session_records_channel() {
        let server = test_server();
        let (session, _rx) = test_session();
        server.register_session("38:Y7bysd", session.clone());

        server.subscribe_session("38:Y7bysd", "users/38");
        assert!(session.subscribed_to_any(&["users/38".to_string()]));
    }

    #[tokio::test]
    async fn auth_fn_is_installable() {
        let server = test_server();
        assert!(server.auth_fn().is_none());

        server.set_auth(|request| Ok(request.user_id == "42"));
        let auth = server.auth_fn().unwrap();

        let request = AuthRequest {
            auth_id: "a1".into(),
            user_id: "42".into(),
            token: None,
            subprotocol: "1.0.0".into(),
            cookie: Map::new(),
            headers: Map::new(),
        };
        assert!(auth(&request).unwrap());
    }
}
