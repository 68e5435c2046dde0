//! Redis-backed nonce store.
//!
//! Redis key patterns:
//! - `nonce:{token}`: nonce data (JSON), TTL = nonce TTL + retention
//! - `nonce:{token}:consumed`: consumption marker, set once with `NX`
//!
//! Every call is bounded by a short timeout. A slow or unreachable Redis
//! makes `consume` fail closed with `NotFound` rather than stall sign-in.

use super::{
    unix_now, Nonce, NonceError, NonceStore, StoreError, DEFAULT_NONCE_TTL, DEFAULT_RETENTION,
};
use crate::auth::token::generate_nonce_token;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;

/// Default per-call Redis timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);

/// Read the nonce and claim its consumption marker in one atomic step.
///
/// Returns nil if the nonce is unknown, otherwise `{first_use, json}` where
/// `first_use` is 1 only for the caller that set the marker.
const CONSUME_SCRIPT: &str = r"
local val = redis.call('GET', KEYS[1])
if not val then
    return nil
end
if redis.call('SET', KEYS[2], '1', 'NX', 'EX', ARGV[1]) then
    return {1, val}
end
return {0, val}
";

#[derive(Clone)]
pub struct RedisNonceStore {
    con: MultiplexedConnection,
    ttl: Duration,
    retention: Duration,
    timeout: Duration,
}

impl RedisNonceStore {
    pub fn new(con: MultiplexedConnection) -> Self {
        Self {
            con,
            ttl: DEFAULT_NONCE_TTL,
            retention: DEFAULT_RETENTION,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Open a client and establish a multiplexed connection.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let con = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(con))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Seconds a key outlives its nonce's validity.
    fn key_lifetime_secs(&self) -> u64 {
        self.ttl
            .as_secs()
            .saturating_add(self.retention.as_secs())
            .max(1)
    }

    /// Shared handle to the underlying connection.
    pub fn connection(&self) -> MultiplexedConnection {
        self.con.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        bounded(self.timeout, fut).await
    }

    pub async fn issue_at(&self, now: u64) -> Result<Nonce, StoreError> {
        let nonce = Nonce {
            token: generate_nonce_token(),
            issued_at: now,
            expires_at: now.saturating_add(self.ttl.as_secs()),
            consumed: false,
        };
        let json = serde_json::to_string(&nonce)?;

        let mut con = self.con.clone();
        self.bounded(con.set_ex::<_, _, ()>(
            nonce_key(&nonce.token),
            json,
            self.key_lifetime_secs(),
        ))
        .await?;

        Ok(nonce)
    }

    pub async fn consume_at(&self, token: &str, now: u64) -> Result<Nonce, NonceError> {
        let mut con = self.con.clone();
        let script = redis::Script::new(CONSUME_SCRIPT);

        let reply: Result<Option<(i64, String)>, StoreError> = self
            .bounded(
                script
                    .key(nonce_key(token))
                    .key(consumed_key(token))
                    .arg(self.key_lifetime_secs())
                    .invoke_async(&mut con),
            )
            .await;

        let (first_use, json) = match reply {
            Ok(Some(found)) => found,
            Ok(None) => return Err(NonceError::NotFound),
            Err(e) => {
                tracing::warn!(error = %e, "Nonce store unavailable, rejecting consume");
                return Err(NonceError::NotFound);
            }
        };

        let mut nonce: Nonce = serde_json::from_str(&json).map_err(|e| {
            tracing::warn!(error = %e, "Corrupt nonce entry, rejecting consume");
            NonceError::NotFound
        })?;

        if nonce.is_expired_at(now) {
            return Err(NonceError::Expired);
        }
        if first_use != 1 {
            return Err(NonceError::AlreadyConsumed);
        }

        nonce.consumed = true;
        Ok(nonce)
    }
}

impl NonceStore for RedisNonceStore {
    async fn issue(&self) -> Result<Nonce, StoreError> {
        self.issue_at(unix_now()).await
    }

    async fn consume(&self, token: &str) -> Result<Nonce, NonceError> {
        self.consume_at(token, unix_now()).await
    }

    async fn prune(&self) -> usize {
        0
    }
}

/// Run a Redis call, giving up after `timeout`.
pub(crate) async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, redis::RedisError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

fn nonce_key(token: &str) -> String {
    format!("nonce:{}", token)
}

fn consumed_key(token: &str) -> String {
    format!("nonce:{}:consumed", token)
}
