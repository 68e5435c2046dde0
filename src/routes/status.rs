//! Wallet connection status endpoint.

use crate::state::AppState;
use crate::status::WalletConnectionState;
use axum::{extract::State, Json};

/// GET /wallet-status: last reported connection state
pub async fn get_status(State(state): State<AppState>) -> Json<WalletConnectionState> {
    Json(state.status.current())
}
