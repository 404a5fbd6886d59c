//! Shielded Notes
//!
//! A Note is a private claim on value locked in the pool.
//!
//! ```text
//! Note = {
//!     amount:        u64,        // base units
//!     k:             [u8; 31],   // nullifier secret
//!     r:             [u8; 31],   // blinding factor
//!     leaf_index:    Option<u64> // assigned by the ledger on confirmation
//!     settlement_id: Option<..>  // id of the operation that inserted it
//! }
//!
//! Text = hex(amount as 8 BE bytes) || hex(k) || hex(r)      (140 chars)
//! ```
//!
//! The text form is the user's only copy of the secret; everything else is
//! derived from it.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commitment::{Commitment, CommitmentScheme};
use crate::nullifier::Nullifier;

/// Size of the k and r nonces. One byte short of a block so the padded value
/// is always below the field modulus.
pub const NONCE_SIZE: usize = 31;

/// Length of the hex text encoding
pub const NOTE_TEXT_LEN: usize = 2 * (8 + NONCE_SIZE + NONCE_SIZE);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NoteError {
    #[error("note text must be {NOTE_TEXT_LEN} characters, got {0}")]
    InvalidLength(usize),
    #[error("note text is not valid hex: {0}")]
    InvalidHex(String),
}

/// A shielded note
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub amount: u64,
    pub k: [u8; NONCE_SIZE],
    pub r: [u8; NONCE_SIZE],
    /// Position in the commitment tree (None until the ledger confirms it)
    pub leaf_index: Option<u64>,
    /// Operation id of the settlement that inserted this note
    pub settlement_id: Option<String>,
}

impl Note {
    /// Create a note with fresh secrets from the OS RNG
    pub fn generate(amount: u64) -> Self {
        Self::generate_with(amount, &mut rand::rngs::OsRng)
    }

    pub fn generate_with<R: RngCore + CryptoRng>(amount: u64, rng: &mut R) -> Self {
        let mut k = [0u8; NONCE_SIZE];
        let mut r = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut k);
        rng.fill_bytes(&mut r);
        Self::from_parts(amount, k, r)
    }

    /// Create a note with explicit secrets (recovery/testing)
    pub fn from_parts(amount: u64, k: [u8; NONCE_SIZE], r: [u8; NONCE_SIZE]) -> Self {
        Self {
            amount,
            k,
            r,
            leaf_index: None,
            settlement_id: None,
        }
    }

    /// Canonical 140-character text encoding
    pub fn text(&self) -> String {
        format!(
            "{:016x}{}{}",
            self.amount,
            hex::encode(self.k),
            hex::encode(self.r)
        )
    }

    /// Parse the text encoding. Leaf index and settlement id are not part of
    /// the text and come back unset.
    pub fn parse_text(text: &str) -> Result<Self, NoteError> {
        let text = text.trim();
        if text.len() != NOTE_TEXT_LEN {
            return Err(NoteError::InvalidLength(text.len()));
        }
        let bytes = hex::decode(text).map_err(|e| NoteError::InvalidHex(e.to_string()))?;

        let mut amount = [0u8; 8];
        let mut k = [0u8; NONCE_SIZE];
        let mut r = [0u8; NONCE_SIZE];
        amount.copy_from_slice(&bytes[..8]);
        k.copy_from_slice(&bytes[8..8 + NONCE_SIZE]);
        r.copy_from_slice(&bytes[8 + NONCE_SIZE..]);

        Ok(Self::from_parts(u64::from_be_bytes(amount), k, r))
    }

    pub fn leaf_value(&self) -> [u8; 32] {
        CommitmentScheme::new().leaf_value(self.amount, &self.k, &self.r)
    }

    pub fn commitment(&self) -> Commitment {
        CommitmentScheme::new().commit(self.amount, &self.k, &self.r)
    }

    pub fn nullifier(&self) -> Nullifier {
        CommitmentScheme::new().nullifier(self.amount, &self.k)
    }

    pub fn with_leaf_index(mut self, leaf_index: u64) -> Self {
        self.leaf_index = Some(leaf_index);
        self
    }

    pub fn with_settlement_id(mut self, settlement_id: impl Into<String>) -> Self {
        self.settlement_id = Some(settlement_id.into());
        self
    }

    pub fn is_confirmed(&self) -> bool {
        self.leaf_index.is_some()
    }
}

impl std::fmt::Debug for Note {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Note")
            .field("amount", &self.amount)
            .field("leaf_index", &self.leaf_index)
            .field("settlement_id", &self.settlement_id)
            .finish_non_exhaustive() // Hides k and r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_round_trip() {
        for amount in [0, 1, 5_000_000, u64::MAX] {
            let note = Note::generate(amount);
            let text = note.text();
            assert_eq!(text.len(), NOTE_TEXT_LEN);
            assert_eq!(Note::parse_text(&text).unwrap(), note);
        }
    }

    #[test]
    fn test_text_layout() {
        let note = Note::from_parts(0x1234, [0xab; NONCE_SIZE], [0xcd; NONCE_SIZE]);
        let text = note.text();

        assert!(text.starts_with("0000000000001234abab"));
        assert!(text.ends_with("cdcd"));
    }

    #[test]
    fn test_parse_accepts_uppercase() {
        let note = Note::generate(77);
        let upper = note.text().to_uppercase();
        assert_eq!(Note::parse_text(&upper).unwrap(), note);
    }

    #[test]
    fn test_parse_rejects_bad_length() {
        let text = Note::generate(1).text();
        assert_eq!(
            Note::parse_text(&text[..139]),
            Err(NoteError::InvalidLength(139))
        );
        assert!(Note::parse_text(&format!("{text}00")).is_err());
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let mut text = Note::generate(1).text();
        text.replace_range(0..1, "z");
        assert!(matches!(
            Note::parse_text(&text),
            Err(NoteError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_derivations_deterministic() {
        let note = Note::from_parts(42, [9; NONCE_SIZE], [8; NONCE_SIZE]);
        let copy = Note::parse_text(&note.text()).unwrap();

        assert_eq!(note.commitment(), copy.commitment());
        assert_eq!(note.nullifier(), copy.nullifier());
        assert_eq!(note.leaf_value(), copy.leaf_value());
    }

    #[test]
    fn test_single_bit_flip_changes_outputs() {
        let base = Note::from_parts(5_000_000, [0x10; NONCE_SIZE], [0x20; NONCE_SIZE]);

        let mut amount_flip = base.clone();
        amount_flip.amount ^= 1;
        let mut k_flip = base.clone();
        k_flip.k[30] ^= 1;
        let mut r_flip = base.clone();
        r_flip.r[0] ^= 0x80;

        for other in [&amount_flip, &k_flip] {
            assert_ne!(base.commitment(), other.commitment());
            assert_ne!(base.nullifier(), other.nullifier());
        }
        // r only blinds the commitment
        assert_ne!(base.commitment(), r_flip.commitment());
        assert_eq!(base.nullifier(), r_flip.nullifier());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let note = Note::from_parts(1, [0xee; NONCE_SIZE], [0xff; NONCE_SIZE]);
        let shown = format!("{note:?}");
        assert!(!shown.contains("238"));
        assert!(shown.contains("amount"));
    }
}
