//! Per-client request limits for the unauthenticated nonce endpoint.
//!
//! Fixed windows: a client's first request opens a window and at most `max`
//! requests are allowed until it closes. The in-memory limiter keeps one
//! counter per IP. The Redis limiter uses `INCR` with a TTL so every
//! instance sharing one Redis also shares each client's budget.

use crate::storage::redis_store::bounded;
use crate::storage::{unix_now, StoreError};
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::net::IpAddr;
use std::time::Duration;

/// Length of one rate limit window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: u64,
    count: u32,
}

enum Counters {
    Memory(DashMap<IpAddr, Window>),
    Redis {
        con: MultiplexedConnection,
        timeout: Duration,
    },
}

pub struct RateLimiter {
    max: u32,
    window: Duration,
    counters: Counters,
}

impl RateLimiter {
    pub fn in_memory(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            counters: Counters::Memory(DashMap::new()),
        }
    }

    pub fn redis(con: MultiplexedConnection, max: u32, window: Duration, timeout: Duration) -> Self {
        Self {
            max,
            window,
            counters: Counters::Redis { con, timeout },
        }
    }

    /// Count one request from `ip`.
    ///
    /// # Returns
    /// * `Ok(true)` if under limit
    /// * `Ok(false)` if limit exceeded
    pub async fn check(&self, ip: IpAddr) -> Result<bool, StoreError> {
        self.check_at(ip, unix_now()).await
    }

    pub async fn check_at(&self, ip: IpAddr, now: u64) -> Result<bool, StoreError> {
        let window_secs = self.window.as_secs().max(1);

        let count = match &self.counters {
            Counters::Memory(windows) => {
                let mut entry = windows.entry(ip).or_insert(Window {
                    started_at: now,
                    count: 0,
                });
                let current = entry.value_mut();
                if now >= current.started_at.saturating_add(window_secs) {
                    *current = Window {
                        started_at: now,
                        count: 0,
                    };
                }
                current.count = current.count.saturating_add(1);
                current.count
            }
            Counters::Redis { con, timeout } => {
                let mut con = con.clone();
                let key = rate_limit_key(ip);

                // Increment counter
                let count: u32 = bounded(*timeout, con.incr(&key, 1)).await?;

                // Set TTL on first request
                if count == 1 {
                    bounded(*timeout, con.expire::<_, ()>(&key, window_secs as i64)).await?;
                }
                count
            }
        };

        Ok(count <= self.max)
    }

    /// Drop closed windows, returning how many were removed. Redis expires
    /// its own counters.
    pub fn prune_at(&self, now: u64) -> usize {
        let Counters::Memory(windows) = &self.counters else {
            return 0;
        };
        let window_secs = self.window.as_secs().max(1);

        let mut removed = 0;
        windows.retain(|_, w| {
            let open = now < w.started_at.saturating_add(window_secs);
            if !open {
                removed += 1;
            }
            open
        });
        removed
    }

    pub fn prune(&self) -> usize {
        self.prune_at(unix_now())
    }
}

fn rate_limit_key(ip: IpAddr) -> String {
    format!("ratelimit:nonce:{}", ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 8));

    #[tokio::test]
    async fn test_refuses_past_limit() {
        let limiter = RateLimiter::in_memory(3, DEFAULT_WINDOW);

        for _ in 0..3 {
            assert!(limiter.check_at(CLIENT, 1_000).await.unwrap());
        }
        assert!(!limiter.check_at(CLIENT, 1_000).await.unwrap());
        assert!(!limiter.check_at(CLIENT, 1_059).await.unwrap());
    }

    #[tokio::test]
    async fn test_clients_counted_separately() {
        let limiter = RateLimiter::in_memory(1, DEFAULT_WINDOW);

        assert!(limiter.check_at(CLIENT, 1_000).await.unwrap());
        assert!(!limiter.check_at(CLIENT, 1_000).await.unwrap());
        assert!(limiter.check_at(OTHER, 1_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_window_resets() {
        let limiter = RateLimiter::in_memory(1, DEFAULT_WINDOW);

        assert!(limiter.check_at(CLIENT, 1_000).await.unwrap());
        assert!(!limiter.check_at(CLIENT, 1_030).await.unwrap());
        assert!(limiter.check_at(CLIENT, 1_060).await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_drops_closed_windows() {
        let limiter = RateLimiter::in_memory(5, DEFAULT_WINDOW);
        limiter.check_at(CLIENT, 1_000).await.unwrap();
        limiter.check_at(OTHER, 1_050).await.unwrap();

        assert_eq!(limiter.prune_at(1_059), 0);
        assert_eq!(limiter.prune_at(1_060), 1);
        assert_eq!(limiter.prune_at(1_110), 1);
        assert_eq!(limiter.prune_at(1_200), 0);
    }

    #[test]
    fn test_key_pattern() {
        assert_eq!(rate_limit_key(CLIENT), "ratelimit:nonce:203.0.113.7");
    }

    #[tokio::test]
    async fn test_redis_refuses_past_limit() {
        // Note: This test requires a running Redis instance
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let connect = async {
            redis::Client::open(redis_url.as_str())?
                .get_multiplexed_async_connection()
                .await
        };
        let con = match tokio::time::timeout(Duration::from_secs(1), connect).await {
            Ok(Ok(con)) => con,
            _ => {
                eprintln!("Skipping test: Redis not available");
                return;
            }
        };

        // Fresh address per run so leftover counters never interfere
        let ip = IpAddr::V4(Ipv4Addr::from(rand::random::<u32>()));
        let limiter = RateLimiter::redis(con, 2, DEFAULT_WINDOW, Duration::from_millis(500));

        assert!(limiter.check(ip).await.unwrap());
        assert!(limiter.check(ip).await.unwrap());
        assert!(!limiter.check(ip).await.unwrap());
    }
}
