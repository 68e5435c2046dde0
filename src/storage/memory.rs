//! In-process nonce registry.
//!
//! Entries live in a [`DashMap`], which locks one shard at a time. `consume`
//! holds the shard's write guard across the whole check-and-set, so two
//! callers racing on the same token are serialized while issue and prune on
//! other shards proceed.

use super::{
    unix_now, Nonce, NonceError, NonceStore, StoreError, DEFAULT_NONCE_TTL, DEFAULT_RETENTION,
};
use crate::auth::token::generate_nonce_token;
use dashmap::DashMap;
use std::time::Duration;

pub struct NonceRegistry {
    nonces: DashMap<String, Nonce>,
    ttl: Duration,
    retention: Duration,
}

impl Default for NonceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self {
            nonces: DashMap::new(),
            ttl: DEFAULT_NONCE_TTL,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh nonce valid for the registry's TTL.
    pub fn issue(&self) -> Nonce {
        self.issue_at(unix_now())
    }

    pub fn issue_at(&self, now: u64) -> Nonce {
        let nonce = Nonce {
            token: generate_nonce_token(),
            issued_at: now,
            expires_at: now.saturating_add(self.ttl.as_secs()),
            consumed: false,
        };
        self.nonces.insert(nonce.token.clone(), nonce.clone());
        nonce
    }

    /// Accept a nonce exactly once.
    pub fn consume(&self, token: &str) -> Result<Nonce, NonceError> {
        self.consume_at(token, unix_now())
    }

    pub fn consume_at(&self, token: &str, now: u64) -> Result<Nonce, NonceError> {
        let mut entry = self.nonces.get_mut(token).ok_or(NonceError::NotFound)?;
        let nonce = entry.value_mut();

        if nonce.is_expired_at(now) {
            return Err(NonceError::Expired);
        }
        if nonce.consumed {
            return Err(NonceError::AlreadyConsumed);
        }

        nonce.consumed = true;
        Ok(nonce.clone())
    }

    /// Remove expired and consumed entries older than the retention window.
    pub fn prune(&self) -> usize {
        self.prune_at(unix_now())
    }

    pub fn prune_at(&self, now: u64) -> usize {
        let mut removed = 0;
        self.nonces.retain(|_, nonce| {
            let stale = nonce.is_stale_at(now, self.retention);
            if stale {
                removed += 1;
            }
            !stale
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }
}

impl NonceStore for NonceRegistry {
    async fn issue(&self) -> Result<Nonce, StoreError> {
        Ok(self.issue_at(unix_now()))
    }

    async fn consume(&self, token: &str) -> Result<Nonce, NonceError> {
        self.consume_at(token, unix_now())
    }

    async fn prune(&self) -> usize {
        self.prune_at(unix_now())
    }
}
