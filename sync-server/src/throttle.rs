//! Rate limiting for the server.
//!
//! Two concerns: brute-forcing the control secret, and action spam from a
//! single client on the WebSocket side. Both use governor's keyed rate
//! limiters backed by DashMap, keyed by peer identity strings (forwarded
//! address for the control endpoint, client id for sessions).
//!
//! Only failed secret attempts consume bad-auth quota, so well-behaved
//! producers are never throttled.

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Rate limiters for the server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits wrong-secret attempts per control-endpoint peer.
    bad_auth_limiter: Arc<KeyedLimiter<String>>,

    /// Limits actions per connected client.
    action_limiter: Arc<KeyedLimiter<String>>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("bad_auth_limiter", &"KeyedLimiter<String>")
            .field("action_limiter", &"KeyedLimiter<String>")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from per-minute quotas.
    ///
    /// # Panics
    ///
    /// Panics if either quota is zero.
    pub fn new(bad_auth_per_minute: u32, actions_per_minute: u32) -> Self {
        let bad_auth =
            NonZeroU32::new(bad_auth_per_minute).expect("bad_auth_per_minute must be > 0");
        let actions =
            NonZeroU32::new(actions_per_minute).expect("actions_per_minute must be > 0");

        Self {
            bad_auth_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(bad_auth))),
            action_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(actions))),
        }
    }

    /// Record a failed control-secret attempt from the given peer.
    ///
    /// Returns `false` once the peer has exhausted its quota; such
    /// requests get 429 instead of 403.
    pub fn register_bad_auth(&self, ident: &str) -> bool {
        self.bad_auth_limiter.check_key(&ident.to_string()).is_ok()
    }

    /// Check whether a client may send another action.
    pub fn check_action(&self, client_id: &str) -> bool {
        self.action_limiter.check_key(&client_id.to_string()).is_ok()
    }

    /// Number of tracked bad-auth peers (for diagnostics).
    pub fn bad_auth_keys_count(&self) -> usize {
        self.bad_auth_limiter.len()
    }

    /// Evict idle entries from the keyed limiters.
    ///
    /// Disconnected peers leave entries behind; `retain_recent()` removes
    /// entries whose quota has fully recharged. Call periodically.
    pub fn shrink(&self) {
        self.bad_auth_limiter.retain_recent();
        self.action_limiter.retain_recent();
    }
}
