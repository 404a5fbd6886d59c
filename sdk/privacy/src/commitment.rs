//! Note Commitments
//!
//! ```text
//! LeafValue  = H(pad32(amount), pad32(k), pad32(r))
//! Commitment = H(LeafValue)
//! Nullifier  = H(pad32(amount), pad32(k))
//! ```
//!
//! `pad32(amount)` is the amount as 8 big-endian bytes left-padded with zeros,
//! `pad32(nonce)` is the 31-byte nonce behind a single zero byte. The leaf
//! value is what a withdrawal proof opens; only its hash ever reaches the
//! ledger.

use serde::{Deserialize, Serialize};

use crate::mimc::MiMC;
use crate::note::NONCE_SIZE;
use crate::nullifier::Nullifier;

/// A note commitment (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commitment(#[serde(with = "hex::serde")] pub [u8; 32]);

impl Commitment {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Commitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Commitment/nullifier algebra over (amount, k, r)
#[derive(Debug, Clone, Default)]
pub struct CommitmentScheme {
    mimc: MiMC,
}

impl CommitmentScheme {
    pub fn new() -> Self {
        Self { mimc: MiMC::new() }
    }

    pub fn leaf_value(&self, amount: u64, k: &[u8; NONCE_SIZE], r: &[u8; NONCE_SIZE]) -> [u8; 32] {
        self.mimc
            .hash(&[pad_amount(amount), pad_nonce(k), pad_nonce(r)])
    }

    pub fn commit(&self, amount: u64, k: &[u8; NONCE_SIZE], r: &[u8; NONCE_SIZE]) -> Commitment {
        Commitment(self.commit_leaf(&self.leaf_value(amount, k, r)))
    }

    /// Hash an already computed leaf value into the value stored in the tree
    pub fn commit_leaf(&self, leaf_value: &[u8; 32]) -> [u8; 32] {
        self.mimc.hash(&[*leaf_value])
    }

    pub fn nullifier(&self, amount: u64, k: &[u8; NONCE_SIZE]) -> Nullifier {
        Nullifier(self.mimc.hash(&[pad_amount(amount), pad_nonce(k)]))
    }
}

/// 24 zero bytes followed by the big-endian amount
pub fn pad_amount(amount: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&amount.to_be_bytes());
    out
}

/// A single zero byte followed by the nonce
pub fn pad_nonce(nonce: &[u8; NONCE_SIZE]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[32 - NONCE_SIZE..].copy_from_slice(nonce);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_layout() {
        let padded = pad_amount(0x0102);
        assert_eq!(&padded[..30], &[0u8; 30]);
        assert_eq!(&padded[30..], &[1, 2]);

        let nonce = [0xaau8; NONCE_SIZE];
        let padded = pad_nonce(&nonce);
        assert_eq!(padded[0], 0);
        assert_eq!(&padded[1..], &nonce[..]);
    }

    #[test]
    fn test_commitment_is_hash_of_leaf_value() {
        let scheme = CommitmentScheme::new();
        let k = [1u8; NONCE_SIZE];
        let r = [2u8; NONCE_SIZE];

        let leaf = scheme.leaf_value(5_000_000, &k, &r);
        assert_eq!(scheme.commit(5_000_000, &k, &r).0, scheme.commit_leaf(&leaf));
    }

    #[test]
    fn test_nullifier_ignores_r() {
        let scheme = CommitmentScheme::new();
        let k = [3u8; NONCE_SIZE];

        let c1 = scheme.commit(10, &k, &[4u8; NONCE_SIZE]);
        let c2 = scheme.commit(10, &k, &[5u8; NONCE_SIZE]);
        assert_ne!(c1, c2);
        assert_eq!(scheme.nullifier(10, &k), scheme.nullifier(10, &k));
    }
}
