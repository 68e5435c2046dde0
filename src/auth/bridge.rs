//! Sign-in orchestration between the nonce store, the signature verifier,
//! and the session host.
//!
//! One call to [`AuthSessionBridge::authenticate`] walks a login attempt
//! through `Received -> NonceChecked -> SignatureChecked -> Succeeded | Rejected`.
//! Nonce and verifier errors never escape: they are folded into the
//! [`AuthOutcome`] of the returned [`AuthResult`].

use crate::auth::address::Address;
use crate::auth::verify::{decode_signature_hex, EthereumVerifier, SignatureVerifier};
use crate::storage::{unix_now, NonceError, NonceStore, StoreError};
use serde::Serialize;

/// Raw fields of a sign-in form submission.
#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub claimed_address: String,
    /// Hex encoded `r || s || v`.
    pub signature: String,
    pub nonce_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthOutcome {
    Success,
    InvalidSignature,
    InvalidNonce,
    ExpiredNonce,
}

impl AuthOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthOutcome::Success => "success",
            AuthOutcome::InvalidSignature => "invalid_signature",
            AuthOutcome::InvalidNonce => "invalid_nonce",
            AuthOutcome::ExpiredNonce => "expired_nonce",
        }
    }
}

impl From<NonceError> for AuthOutcome {
    fn from(err: NonceError) -> Self {
        match err {
            NonceError::Expired => AuthOutcome::ExpiredNonce,
            NonceError::NotFound | NonceError::AlreadyConsumed => AuthOutcome::InvalidNonce,
        }
    }
}

/// Result handed to the session host. Only `Success` may open a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthResult {
    /// Checksummed when the claimed address parses, otherwise as submitted.
    pub address: String,
    /// Unix seconds.
    pub verified_at: u64,
    pub outcome: AuthOutcome,
}

/// Progress of a single attempt, recorded in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptStage {
    Received,
    NonceChecked,
    SignatureChecked,
    Succeeded,
    Rejected,
}

/// A freshly issued nonce and the exact text the wallet must sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Challenge {
    pub token: String,
    pub message: String,
    pub expires_at: u64,
}

/// The text a wallet signs to prove control of an address for one nonce.
pub fn challenge_message(service_name: &str, token: &str) -> String {
    format!("Sign in to {} \u{2014} nonce: {}", service_name, token)
}

pub struct AuthSessionBridge<S, V = EthereumVerifier> {
    nonces: S,
    verifier: V,
    service_name: String,
}

impl<S: NonceStore> AuthSessionBridge<S> {
    pub fn new(nonces: S, service_name: impl Into<String>) -> Self {
        Self::with_verifier(nonces, EthereumVerifier, service_name)
    }
}

impl<S: NonceStore, V: SignatureVerifier> AuthSessionBridge<S, V> {
    pub fn with_verifier(nonces: S, verifier: V, service_name: impl Into<String>) -> Self {
        Self {
            nonces,
            verifier,
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn nonces(&self) -> &S {
        &self.nonces
    }

    pub fn challenge_message(&self, token: &str) -> String {
        challenge_message(&self.service_name, token)
    }

    /// Issue a nonce and build the message the client must sign with it.
    pub async fn issue_challenge(&self) -> Result<Challenge, StoreError> {
        let nonce = self.nonces.issue().await?;
        Ok(Challenge {
            message: self.challenge_message(&nonce.token),
            token: nonce.token,
            expires_at: nonce.expires_at,
        })
    }

    /// Run one login attempt to a terminal outcome.
    ///
    /// Consumes the nonce exactly once whatever the outcome. The signature
    /// is only examined after the nonce has been accepted.
    pub async fn authenticate(&self, attempt: &LoginAttempt) -> AuthResult {
        let address = display_address(&attempt.claimed_address);
        let stage = AttemptStage::Received;

        let nonce = match self.nonces.consume(&attempt.nonce_token).await {
            Ok(nonce) => nonce,
            Err(e) => return self.reject(stage, address, e.into(), &e),
        };
        let stage = AttemptStage::NonceChecked;
        tracing::debug!(stage = ?stage, address = %address, "Nonce accepted");

        let message = self.challenge_message(&nonce.token);
        let verified = decode_signature_hex(&attempt.signature).and_then(|signature| {
            self.verifier
                .verify(message.as_bytes(), &signature, &attempt.claimed_address)
        });
        let stage = AttemptStage::SignatureChecked;

        match verified {
            Ok(true) => {
                tracing::info!(
                    action = "auth_success",
                    stage = ?AttemptStage::Succeeded,
                    address = %address,
                    "Wallet signature verified"
                );
                AuthResult {
                    address,
                    verified_at: unix_now(),
                    outcome: AuthOutcome::Success,
                }
            }
            Ok(false) => self.reject(
                stage,
                address,
                AuthOutcome::InvalidSignature,
                &"signer does not match claimed address",
            ),
            Err(e) => self.reject(stage, address, AuthOutcome::InvalidSignature, &e),
        }
    }

    fn reject(
        &self,
        reached: AttemptStage,
        address: String,
        outcome: AuthOutcome,
        reason: &dyn std::fmt::Display,
    ) -> AuthResult {
        tracing::warn!(
            action = "auth_rejected",
            stage = ?AttemptStage::Rejected,
            reached = ?reached,
            outcome = outcome.as_str(),
            reason = %reason,
            address = %address,
            "Wallet sign-in rejected"
        );
        AuthResult {
            address,
            verified_at: unix_now(),
            outcome,
        }
    }
}

fn display_address(raw: &str) -> String {
    raw.parse::<Address>()
        .map(|address| address.to_checksum())
        .unwrap_or_else(|_| raw.to_string())
}
