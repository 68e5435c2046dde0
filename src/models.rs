//! Request and response models for the API.
//!
//! All models use serde for serialization/deserialization.

use crate::auth::bridge::{Challenge, LoginAttempt};
use serde::{Deserialize, Serialize};

// ============================================================================
// Auth Models
// ============================================================================

/// Response containing a nonce and the message to sign with it.
#[derive(Debug, Serialize, Deserialize)]
pub struct NonceResponse {
    pub token: String,
    pub message: String,
    pub expires_at: u64,
}

impl From<Challenge> for NonceResponse {
    fn from(challenge: Challenge) -> Self {
        Self {
            token: challenge.token,
            message: challenge.message,
            expires_at: challenge.expires_at,
        }
    }
}

/// Request to verify a signed challenge.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub address: String,
    pub signature: String, // hex, optional 0x prefix
    pub nonce: String,
}

impl From<VerifyRequest> for LoginAttempt {
    fn from(req: VerifyRequest) -> Self {
        Self {
            claimed_address: req.address,
            signature: req.signature,
            nonce_token: req.nonce,
        }
    }
}
