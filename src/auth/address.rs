//! Ethereum account addresses and EIP-55 checksum encoding.

use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Number of bytes in an account address.
pub const ADDRESS_LEN: usize = 20;

/// A 20-byte account address.
///
/// Parses from 40 hex characters with an optional `0x` prefix and always
/// displays in EIP-55 checksummed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("expected 40 hex characters, got {0}")]
    InvalidLength(usize),

    #[error("address contains non-hex characters")]
    InvalidHex,

    #[error("mixed-case address does not match its EIP-55 checksum")]
    BadChecksum,
}

impl Address {
    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Derive the address of a secp256k1 public key: the last 20 bytes of
    /// keccak256 over the uncompressed point without its `0x04` tag.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        let digest = Keccak256::digest(&point.as_bytes()[1..]);
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&digest[12..]);
        Self(bytes)
    }

    /// EIP-55 mixed-case encoding, `0x`-prefixed.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = Keccak256::digest(lower.as_bytes());

        let mut out = String::with_capacity(2 + 2 * ADDRESS_LEN);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let byte = hash[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        if digits.len() != 2 * ADDRESS_LEN {
            return Err(AddressError::InvalidLength(digits.len()));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::InvalidHex);
        }

        let mut bytes = [0u8; ADDRESS_LEN];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| AddressError::InvalidHex)?;
        let address = Self(bytes);

        // Single-case input carries no checksum; mixed case must match exactly.
        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum()[2..] != *digits {
            return Err(AddressError::BadChecksum);
        }

        Ok(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    // Reference vectors from EIP-55.
    const CHECKSUMMED: [&str; 4] = [
        "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
        "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
        "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
    ];

    #[test]
    fn test_checksum_vectors() {
        for expected in CHECKSUMMED {
            let lower = expected.to_lowercase();
            let address: Address = lower.parse().unwrap();
            assert_eq!(address.to_checksum(), expected);
            assert_eq!(address.to_string(), expected);
        }
    }

    #[test]
    fn test_parse_accepts_valid_checksum() {
        for s in CHECKSUMMED {
            assert!(s.parse::<Address>().is_ok(), "{} should parse", s);
        }
    }

    #[test]
    fn test_parse_single_case_without_prefix() {
        let upper = CHECKSUMMED[0][2..].to_uppercase();
        let address: Address = upper.parse().unwrap();
        assert_eq!(address.to_checksum(), CHECKSUMMED[0]);
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        // Flip the case of one letter in a valid checksummed address
        let bad = CHECKSUMMED[0].replacen('a', "A", 1);
        assert_eq!(bad.parse::<Address>(), Err(AddressError::BadChecksum));
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert_eq!(
            "0x1234".parse::<Address>(),
            Err(AddressError::InvalidLength(4))
        );
        assert!(matches!(
            "".parse::<Address>(),
            Err(AddressError::InvalidLength(0))
        ));
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let s = format!("0x{}", "g".repeat(40));
        assert_eq!(s.parse::<Address>(), Err(AddressError::InvalidHex));
    }

    #[test]
    fn test_from_verifying_key_known_vector() {
        // Well-known development key #0
        let private_key =
            hex::decode("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80")
                .unwrap();
        let signing_key = SigningKey::from_slice(&private_key).unwrap();
        let address = Address::from_verifying_key(signing_key.verifying_key());
        assert_eq!(
            address.to_checksum(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        );
    }

    #[test]
    fn test_serde_uses_checksum() {
        let address: Address = CHECKSUMMED[1].to_lowercase().parse().unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", CHECKSUMMED[1]));

        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);

        assert!(serde_json::from_str::<Address>("\"0xnope\"").is_err());
    }
}
