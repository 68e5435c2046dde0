//! API route handlers.

pub mod auth;
pub mod status;

use crate::middleware::security_headers;
use crate::state::AppState;
use axum::{routing::get, routing::post, Router};
use tower_http::cors::CorsLayer;

/// Request bodies are a few short strings; anything larger is refused.
pub const MAX_BODY_BYTES: usize = 4 * 1024;

/// Build the API router with all endpoints.
pub fn api_router() -> Router<AppState> {
    Router::new()
        // Auth endpoints
        .route("/api/auth/nonce", post(auth::issue_nonce))
        .route("/api/auth/verify", post(auth::verify_login))
        // Connection status; reports arrive over the local status socket
        .route("/wallet-status", get(status::get_status))
}

/// Full application: API routes, body limit, CORS and security headers.
pub fn app(state: AppState) -> Router {
    // Explicit CORS: deny all cross-origin requests (single-origin deployment).
    // CorsLayer::new() with no allowed origins rejects all CORS preflight requests.
    let cors = CorsLayer::new();

    api_router()
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(axum::middleware::from_fn(security_headers))
        .with_state(state)
}
