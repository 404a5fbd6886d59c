//! Nullifiers
//!
//! ```text
//! Nullifier = H(pad32(amount), pad32(k))
//! ```
//!
//! Published when a note is spent. The on-chain verifier keeps one marker per
//! nullifier, so a note can be withdrawn from at most once.

use serde::{Deserialize, Serialize};

/// A nullifier (32 bytes) - unique tag for a spent note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nullifier(#[serde(with = "hex::serde")] pub [u8; 32]);

impl Nullifier {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Nullifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Nullifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
