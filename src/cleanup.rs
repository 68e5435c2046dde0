//! Background prune job for spent and expired nonces.
//!
//! Consumed and expired nonces are kept for a retention window so replays
//! report `AlreadyConsumed`/`Expired` instead of `NotFound`. After that they
//! only take up memory, so this job periodically drops them, along with the
//! rate limiter's closed windows.

use crate::ratelimit::RateLimiter;
use crate::storage::NonceStore;
use std::sync::Arc;
use std::time::Duration;

/// Run the prune loop.
///
/// Calls [`NonceStore::prune`] and [`RateLimiter::prune`] every `interval`.
/// Never returns.
pub async fn run_prune_loop<S>(store: Arc<S>, limiter: Arc<RateLimiter>, interval: Duration)
where
    S: NonceStore + 'static,
{
    loop {
        tokio::time::sleep(interval).await;
        prune_once(store.as_ref()).await;

        let windows = limiter.prune();
        if windows > 0 {
            tracing::debug!(removed = windows, "Rate limit windows pruned");
        }
    }
}

/// One prune pass. Returns the number of entries removed.
pub async fn prune_once<S: NonceStore>(store: &S) -> usize {
    let removed = store.prune().await;
    if removed > 0 {
        tracing::info!(removed = removed, "Nonce prune completed");
    } else {
        tracing::debug!("Nonce prune found nothing to remove");
    }
    removed
}
