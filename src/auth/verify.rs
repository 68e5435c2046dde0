//! secp256k1 signature recovery for Ethereum `personal_sign` messages.

use crate::auth::address::{Address, AddressError};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

/// Length of an `(r, s, v)` signature in bytes.
pub const SIGNATURE_LEN: usize = 65;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Malformed address: {0}")]
    MalformedAddress(#[from] AddressError),

    /// The signature is well-formed but no public key recovers from it.
    #[error("No public key recovers from signature")]
    Unrecoverable,
}

/// Checks that a signature over a message was produced by a claimed address.
///
/// Implementations must be pure: no I/O, no shared state.
pub trait SignatureVerifier: Send + Sync {
    /// Returns `Ok(true)` if the signer of `message` is `claimed_address`,
    /// `Ok(false)` for a well-formed signature from someone else.
    fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
        claimed_address: &str,
    ) -> Result<bool, VerifyError>;
}

/// Verifier for EIP-191 `personal_sign` signatures as produced by browser wallets.
#[derive(Debug, Clone, Copy, Default)]
pub struct EthereumVerifier;

impl SignatureVerifier for EthereumVerifier {
    fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
        claimed_address: &str,
    ) -> Result<bool, VerifyError> {
        verify_signature(message, signature, claimed_address)
    }
}

/// Verify a `personal_sign` signature against a claimed address.
///
/// # Returns
/// * `Ok(true)` if the recovered signer equals `claimed_address`
/// * `Ok(false)` if the signature is well-formed but from another key
/// * `Err(VerifyError)` if the signature or address cannot be parsed
pub fn verify_signature(
    message: &[u8],
    signature: &[u8],
    claimed_address: &str,
) -> Result<bool, VerifyError> {
    let recovered = match recover_address(message, signature) {
        Ok(address) => Some(address),
        Err(VerifyError::Unrecoverable) => None,
        Err(e) => return Err(e),
    };

    let claimed: Address = claimed_address.parse()?;
    Ok(recovered == Some(claimed))
}

/// Recover the address that signed `message`.
pub fn recover_address(message: &[u8], signature: &[u8]) -> Result<Address, VerifyError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(VerifyError::MalformedSignature(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LEN,
            signature.len()
        )));
    }

    let recovery_id = normalize_recovery_id(signature[64])?;
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| VerifyError::MalformedSignature(format!("invalid r/s: {}", e)))?;

    let prehash = personal_sign_hash(message);
    let key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|_| VerifyError::Unrecoverable)?;

    Ok(Address::from_verifying_key(&key))
}

/// Accepts `v` as 0/1 or the legacy 27/28.
fn normalize_recovery_id(v: u8) -> Result<RecoveryId, VerifyError> {
    let id = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        _ => {
            return Err(VerifyError::MalformedSignature(format!(
                "invalid recovery id {}",
                v
            )))
        }
    };
    RecoveryId::from_byte(id)
        .ok_or_else(|| VerifyError::MalformedSignature(format!("invalid recovery id {}", v)))
}

/// keccak256("\x19Ethereum Signed Message:\n" || len(message) || message)
pub fn personal_sign_hash(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(message);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Decode a hex signature as submitted by a wallet (`0x` prefix optional).
pub fn decode_signature_hex(signature: &str) -> Result<Vec<u8>, VerifyError> {
    let trimmed = signature.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits)
        .map_err(|e| VerifyError::MalformedSignature(format!("invalid hex: {}", e)))
}

/// Sign a message the way a wallet's `personal_sign` does, returning `r || s || v`
/// with `v` in the 27/28 form.
pub fn sign_personal_message(
    key: &SigningKey,
    message: &[u8],
) -> Result<[u8; SIGNATURE_LEN], k256::ecdsa::Error> {
    let prehash = personal_sign_hash(message);
    let (sig, recovery_id) = key.sign_prehash_recoverable(&prehash)?;

    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = recovery_id.to_byte() + 27;
    Ok(out)
}
