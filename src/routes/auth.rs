//! Auth API endpoints.

use crate::auth::bridge::LoginAttempt;
use crate::error::AppError;
use crate::models::{NonceResponse, VerifyRequest};
use crate::state::AppState;
use axum::{
    extract::{ConnectInfo, State},
    response::IntoResponse,
    Json,
};
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

/// POST /api/auth/nonce: issue a challenge nonce and the message to sign
pub async fn issue_nonce(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<impl IntoResponse, AppError> {
    // Rate limit by IP; every nonce occupies the store until it is pruned
    let allowed = state.nonce_limiter.check(addr.ip()).await?;
    if !allowed {
        let mut hasher = std::hash::DefaultHasher::new();
        addr.ip().hash(&mut hasher);
        let ip_hash = format!("{:x}", hasher.finish());
        tracing::warn!(action = "rate_limited", endpoint = "auth/nonce", ip_hash = %ip_hash, "Rate limit exceeded");
        return Err(AppError::RateLimited);
    }

    let challenge = state.bridge.issue_challenge().await?;

    tracing::debug!(action = "nonce_issued", expires_at = challenge.expires_at, "Challenge issued");

    Ok(Json(NonceResponse::from(challenge)))
}

/// POST /api/auth/verify: check a signed challenge
///
/// Every failure gets the same 401 body; the bridge logs the real outcome.
pub async fn verify_login(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = LoginAttempt::from(req);
    let result = state.bridge.authenticate(&attempt).await;

    if !result.outcome.is_success() {
        return Err(AppError::sign_in_failed());
    }

    Ok(Json(result))
}
