//! Challenge nonce storage.
//!
//! Two backends implement [`NonceStore`]:
//! - [`NonceRegistry`]: in-process sharded map, for single-instance deployments
//! - [`RedisNonceStore`]: shared Redis, for several instances behind one host
//!
//! Both guarantee that a nonce is accepted at most once: `consume` is a
//! single atomic check-and-set per token.

pub mod memory;
pub mod redis_store;

pub use memory::NonceRegistry;
pub use redis_store::RedisNonceStore;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default challenge lifetime.
pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(300);

/// Default time spent or expired nonces are kept before pruning.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

/// A single-use sign-in challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce {
    pub token: String,
    /// Unix seconds.
    pub issued_at: u64,
    /// Unix seconds. The nonce is valid up to and including this second.
    pub expires_at: u64,
    pub consumed: bool,
}

impl Nonce {
    pub fn is_expired_at(&self, now: u64) -> bool {
        now > self.expires_at
    }

    /// Whether a pruning pass at `now` may drop this entry.
    pub fn is_stale_at(&self, now: u64, retention: Duration) -> bool {
        let retention = retention.as_secs();
        now > self.expires_at.saturating_add(retention)
            || (self.consumed && now > self.issued_at.saturating_add(retention))
    }
}

/// Why a nonce was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NonceError {
    #[error("Nonce not found")]
    NotFound,

    #[error("Nonce expired")]
    Expired,

    #[error("Nonce already consumed")]
    AlreadyConsumed,
}

/// Backend failures while issuing a nonce.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Nonce store timed out after {0:?}")]
    Timeout(Duration),
}

/// Issue, consume and prune challenge nonces.
pub trait NonceStore: Send + Sync {
    /// Create and store a fresh nonce.
    fn issue(&self) -> impl Future<Output = Result<Nonce, StoreError>> + Send;

    /// Atomically accept a nonce. Storage failures reject with `NotFound`.
    fn consume(&self, token: &str) -> impl Future<Output = Result<Nonce, NonceError>> + Send;

    /// Drop stale entries, returning how many were removed.
    fn prune(&self) -> impl Future<Output = usize> + Send;
}

impl<T: NonceStore> NonceStore for Arc<T> {
    fn issue(&self) -> impl Future<Output = Result<Nonce, StoreError>> + Send {
        T::issue(self.as_ref())
    }

    fn consume(&self, token: &str) -> impl Future<Output = Result<Nonce, NonceError>> + Send {
        T::consume(self.as_ref(), token)
    }

    fn prune(&self) -> impl Future<Output = usize> + Send {
        T::prune(self.as_ref())
    }
}

/// Backend chosen at startup from configuration.
pub enum NonceBackend {
    Memory(NonceRegistry),
    Redis(RedisNonceStore),
}

impl NonceBackend {
    pub fn name(&self) -> &'static str {
        match self {
            NonceBackend::Memory(_) => "memory",
            NonceBackend::Redis(_) => "redis",
        }
    }
}

impl NonceStore for NonceBackend {
    async fn issue(&self) -> Result<Nonce, StoreError> {
        match self {
            NonceBackend::Memory(registry) => Ok(registry.issue_at(unix_now())),
            NonceBackend::Redis(store) => store.issue_at(unix_now()).await,
        }
    }

    async fn consume(&self, token: &str) -> Result<Nonce, NonceError> {
        match self {
            NonceBackend::Memory(registry) => registry.consume_at(token, unix_now()),
            NonceBackend::Redis(store) => store.consume_at(token, unix_now()).await,
        }
    }

    async fn prune(&self) -> usize {
        match self {
            NonceBackend::Memory(registry) => registry.prune_at(unix_now()),
            // Redis expires keys itself
            NonceBackend::Redis(_) => 0,
        }
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonce(issued_at: u64, expires_at: u64, consumed: bool) -> Nonce {
        Nonce {
            token: "t".to_string(),
            issued_at,
            expires_at,
            consumed,
        }
    }

    #[test]
    fn test_is_expired_at_boundary() {
        let n = nonce(100, 105, false);
        assert!(!n.is_expired_at(105));
        assert!(n.is_expired_at(106));
    }

    #[test]
    fn test_is_stale_unconsumed() {
        let n = nonce(100, 400, false);
        let retention = Duration::from_secs(600);
        assert!(!n.is_stale_at(500, retention));
        assert!(!n.is_stale_at(1000, retention));
        assert!(n.is_stale_at(1001, retention));
    }

    #[test]
    fn test_is_stale_consumed() {
        let n = nonce(100, 400, true);
        let retention = Duration::from_secs(60);
        assert!(!n.is_stale_at(160, retention));
        assert!(n.is_stale_at(161, retention));
    }

    #[tokio::test]
    async fn test_backend_memory_roundtrip() {
        let backend = Arc::new(NonceBackend::Memory(NonceRegistry::new()));
        assert_eq!(backend.name(), "memory");

        let nonce = NonceStore::issue(&backend).await.unwrap();
        let consumed = NonceStore::consume(&backend, &nonce.token).await.unwrap();
        assert!(consumed.consumed);
        assert_eq!(consumed.token, nonce.token);

        assert_eq!(
            NonceStore::consume(&backend, &nonce.token).await,
            Err(NonceError::AlreadyConsumed)
        );
        assert_eq!(
            NonceStore::consume(&backend, "missing").await,
            Err(NonceError::NotFound)
        );
    }

    #[test]
    fn test_unix_now_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(unix_now() > 1_577_836_800);
    }
}
