//! HTTP control endpoint, health checks, and the producer-side helper.
//!
//! Trusted backends talk to the server over plain HTTP: `POST /` with
//! `{ version, secret, commands }`. The secret never appears in responses;
//! peers that keep guessing it wrong are throttled.

use crate::request::{ControlReject, ControlRequest};
use crate::server::Server;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use sync_types::{Action, PROTOCOL_VERSION};

/// Global start time for uptime calculation.
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Build the HTTP router with all control endpoints.
pub fn build_router(server: Arc<Server>) -> Router {
    Router::new()
        .route("/", post(dispatch_handler))
        .route("/health", get(health_handler))
        .layer(Extension(server))
}

/// Entry point for all requests from control-plane producers.
async fn dispatch_handler(
    Extension(server): Extension<Arc<Server>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    server
        .metrics()
        .control_requests_total
        .fetch_add(1, Ordering::Relaxed);

    let request: ControlRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("malformed request: {e}"))
                .into_response()
        }
    };

    match request.apply(&server).await {
        Ok(answers) => {
            for answer in &answers {
                tracing::debug!(?answer, "command result");
            }
            Json(answers).into_response()
        }
        Err(ControlReject::UnsupportedVersion(version)) => (
            StatusCode::BAD_REQUEST,
            format!("unsupported protocol version: {version}"),
        )
            .into_response(),
        Err(ControlReject::WrongSecret) => {
            let ident = peer_ident(&headers);
            server.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
            if server.limits().register_bad_auth(&ident) {
                tracing::warn!(%ident, "wrong control secret");
                (StatusCode::FORBIDDEN, "wrong secret").into_response()
            } else {
                server
                    .metrics()
                    .rate_limit_hits
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%ident, "wrong control secret (throttled)");
                StatusCode::TOO_MANY_REQUESTS.into_response()
            }
        }
    }
}

/// Identity of the requesting peer, from the forwarding header when a
/// proxy sits in front.
fn peer_ident(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split_whitespace().collect::<String>())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "direct".to_string())
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Number of connected sessions.
    pub sessions: usize,
    /// Number of actions in the log.
    pub actions: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
async fn health_handler(Extension(server): Extension<Arc<Server>>) -> Json<HealthStatus> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: server.session_count(),
        actions: server.log().len(),
        uptime_seconds: uptime,
    })
}

/// Errors from the producer-side [`add`] helper.
#[derive(Debug, thiserror::Error)]
pub enum AddError {
    /// The HTTP request itself failed.
    #[error("control request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The control endpoint answered with a non-success status.
    #[error("control endpoint returned {status}: {body}")]
    BadStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// Send one action to a control endpoint.
///
/// Low-level producer API for out-of-process backends. When `meta` is
/// `None` an empty meta is sent and the server fills in `id` and `time`.
pub async fn add(
    url: &str,
    secret: &str,
    action: &Action,
    meta: Option<Map<String, Value>>,
) -> Result<(), AddError> {
    let command = serde_json::json!({
        "version": PROTOCOL_VERSION,
        "secret": secret,
        "commands": [
            {
                "command": "action",
                "action": action,
                "meta": meta.unwrap_or_default(),
            }
        ],
    });

    tracing::debug!(%url, action_type = %action.kind, "adding action via control endpoint");
    let response = reqwest::Client::new().post(url).json(&command).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(%status, %body, "control endpoint rejected action");
        return Err(AddError::BadStatus {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}
