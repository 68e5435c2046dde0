//! Wallet sign-in: Ethereum addresses, personal_sign verification, nonce
//! tokens, and the bridge that ties them to a session host.

pub mod address;
pub mod bridge;
pub mod token;
pub mod verify;

pub use address::Address;
pub use bridge::{AuthOutcome, AuthResult, AuthSessionBridge, Challenge, LoginAttempt};
pub use token::generate_nonce_token;
pub use verify::{verify_signature, EthereumVerifier, SignatureVerifier, VerifyError};
