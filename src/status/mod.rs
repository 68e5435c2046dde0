//! Wallet connection status, shared with out-of-process watchers.

#[cfg(unix)]
pub mod socket;

use crate::storage::unix_now;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Last observed wallet connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConnectionState {
    pub connected: bool,
    /// Unix seconds; 0 until the first report.
    pub observed_at: u64,
}

impl WalletConnectionState {
    pub fn observed_now(connected: bool) -> Self {
        Self {
            connected,
            observed_at: unix_now(),
        }
    }
}

/// Process-wide, last-value-wins connection status.
///
/// Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct ConnectionStatusChannel {
    tx: Arc<watch::Sender<WalletConnectionState>>,
}

impl Default for ConnectionStatusChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStatusChannel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(WalletConnectionState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Overwrite the current state and wake every subscriber.
    pub fn report(&self, state: WalletConnectionState) {
        let previous = self.tx.send_replace(state);
        if previous.connected != state.connected {
            tracing::info!(
                connected = state.connected,
                observed_at = state.observed_at,
                "Wallet connection state changed"
            );
        }
    }

    pub fn current(&self) -> WalletConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WalletConnectionState> {
        self.tx.subscribe()
    }
}
