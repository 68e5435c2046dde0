//! Application state shared across handlers.

use crate::auth::bridge::AuthSessionBridge;
use crate::ratelimit::RateLimiter;
use crate::status::ConnectionStatusChannel;
use crate::storage::NonceBackend;
use std::sync::Arc;

/// The bridge used by the HTTP surface: a shared backend and the
/// Ethereum verifier.
pub type SharedBridge = AuthSessionBridge<Arc<NonceBackend>>;

#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<SharedBridge>,
    pub status: ConnectionStatusChannel,
    pub nonce_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        nonces: Arc<NonceBackend>,
        service_name: impl Into<String>,
        status: ConnectionStatusChannel,
        nonce_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            bridge: Arc::new(AuthSessionBridge::new(nonces, service_name)),
            status,
            nonce_limiter,
        }
    }
}
