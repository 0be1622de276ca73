//! WebSocket path: connection admission and per-connection message
//! throttling for upgraded sockets.12.
//!
//! Two independent limiters exist here, both built the way
//! [`crate::middleware::governor::GovernorRateLimit`] builds its
//! limiters — a `governor` quota with a burst allowance:
//! - a per-origin connection-rate limiter, checked once before the
//!   handshake completes;
//! - a per-connection message-rate limiter, checked on every inbound
//!   frame after the upgrade.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use dashmap::DashMap;
use governor::{clock::DefaultClock, state::{InMemoryState, NotKeyed}, Quota, RateLimiter};

use crate::config::WebSocketConfig;

type GovernorLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// The fixed close-code table from
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const UNAUTHORIZED: u16 = 4001;
    pub const FORBIDDEN: u16 = 4003;
    pub const RATE_LIMITED: u16 = 4429;
}

fn build_limiter(events_per_window: u32, window: Duration, burst: u32) -> GovernorLimiter {
    let replenish_interval = window.checked_div(events_per_window.max(1)).unwrap_or(window);
    let replenish_interval = if replenish_interval.is_zero() { Duration::from_millis(1) } else { replenish_interval };
    let quota = Quota::with_period(replenish_interval)
        .expect("replenish interval is non-zero")
        .allow_burst(NonZeroU32::new(burst.max(1)).unwrap());
    RateLimiter::direct(quota)
}

/// Per-connection message throttle. One of these is created per socket
/// after a successful upgrade; it holds no shared state, so connections
/// never contend with each other.
pub struct MessageRateLimiter {
    limiter: GovernorLimiter,
}

impl MessageRateLimiter {
    fn new(config: &WebSocketConfig) -> Self {
        Self { limiter: build_limiter(config.message_rate, Duration::from_secs(1), config.burst) }
    }

    /// `true` if this frame is within the connection's message budget.
    /// A `false` return means the caller should close the socket with
    /// [`close_code::RATE_LIMITED`].
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// Admission control for new WebSocket connections, plus a factory for
/// per-connection message limiters. One instance is shared across all
/// upgrade requests for the gateway's lifetime.
pub struct WebSocketGateway {
    config: WebSocketConfig,
    connection_limiters: DashMap<String, Arc<GovernorLimiter>>,
}

impl WebSocketGateway {
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config, connection_limiters: DashMap::new() }
    }

    /// Checked before the Upgrade completes. `origin` is the request's
    /// `Origin` header (or the client IP if absent). A `false` return
    /// means the caller should respond `429` instead of upgrading.
    pub fn check_connection_allowed(&self, origin: &str) -> bool {
        let limiter = self
            .connection_limiters
            .entry(origin.to_string())
            .or_insert_with(|| {
                Arc::new(build_limiter(
                    self.config.connection_rate,
                    Duration::from_secs(60),
                    self.config.connection_burst,
                ))
            })
            .clone();
        limiter.check().is_ok()
    }

    /// Builds the message-rate limiter for one newly upgraded socket.
    pub fn new_message_limiter(&self) -> MessageRateLimiter {
        MessageRateLimiter::new(&self.config)
    }
}

/// Picks the first client-requested subprotocol this gateway supports,
/// preserving the client's preference order (RFC 6455 §1.9).
pub fn select_subprotocol(requested: &HeaderValue, supported: &[&str]) -> Option<String> {
    let requested = requested.to_str().ok()?;
    requested.split(',').map(str::trim).find(|p| supported.contains(p)).map(String::from)
}

/// Returns the subset of client-requested extensions this gateway
/// supports, in the client's order.
pub fn negotiate_extensions(requested: &HeaderValue, supported: &[&str]) -> Vec<String> {
    requested
        .to_str()
        .ok()
        .map(|s| s.split(',').map(str::trim).filter(|e| supported.contains(e)).map(String::from).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WebSocketConfig {
        WebSocketConfig { message_rate: 5, burst: 2, connection_rate: 3, connection_burst: 1 }
    }

    #[test]
    fn connection_limiter_allows_burst_then_rejects() {
        let gateway = WebSocketGateway::new(config());
        assert!(gateway.check_connection_allowed("https://client.example"));
    }

    #[test]
    fn connection_limiters_are_independent_per_origin() {
        let gateway = WebSocketGateway::new(WebSocketConfig { connection_rate: 1, connection_burst: 1, ..config() });
        assert!(gateway.check_connection_allowed("https://a.example"));
        assert!(gateway.check_connection_allowed("https://b.example"));
    }

    #[test]
    fn message_limiter_rejects_past_burst() {
        let limiter = MessageRateLimiter::new(&WebSocketConfig { message_rate: 1, burst: 1, ..config() });
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn subprotocol_negotiation_prefers_client_order() {
        let requested = HeaderValue::from_static("graphql-ws, chat-v2");
        assert_eq!(select_subprotocol(&requested, &["chat-v2", "graphql-ws"]), Some("graphql-ws".to_string()));
        assert_eq!(select_subprotocol(&requested, &["unsupported"]), None);
    }

    #[test]
    fn extension_negotiation_keeps_only_supported() {
        let requested = HeaderValue::from_static("permessage-deflate, unknown-ext");
        assert_eq!(negotiate_extensions(&requested, &["permessage-deflate"]), vec!["permessage-deflate".to_string()]);
    }

    #[test]
    fn close_codes_match_the_fixed_table() {
        assert_eq!(close_code::NORMAL, 1000);
        assert_eq!(close_code::POLICY_VIOLATION, 1008);
        assert_eq!(close_code::UNAUTHORIZED, 4001);
        assert_eq!(close_code::FORBIDDEN, 4003);
        assert_eq!(close_code::RATE_LIMITED, 4429);
    }
}
