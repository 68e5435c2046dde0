//! Challenge token generation.

use base64::{engine::general_purpose, Engine as _};
use rand::Rng;

/// Random bytes per token (256 bits of entropy).
pub const TOKEN_BYTES: usize = 32;

/// Generate a cryptographically random challenge nonce token.
///
/// Returns URL-safe base64 without padding (43 characters) so the token can
/// be embedded in a signed message and echoed back in a form field verbatim.
pub fn generate_nonce_token() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; TOKEN_BYTES];
    rng.fill(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
