//! Shroud Privacy Primitives
//!
//! Note commitments, nullifiers and the commitment accumulator of the shielded
//! pool. Everything here is pure and synchronous; ledger access lives in
//! `shroud-core`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Shielded Pool                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────┐  │
//! │  │  Nullifiers  │  │ Commitments  │  │   Merkle Accumulator  │  │
//! │  │  (spent)     │  │  (new notes) │  │   (depth 24, MiMC)    │  │
//! │  └──────────────┘  └──────────────┘  └───────────────────────┘  │
//! │         ▲                 ▲                     ▲               │
//! │         └─────────────────┴──────────┬──────────┘               │
//! │                                      │                          │
//! │  ┌───────────────────────────────────┴─────────────────────┐    │
//! │  │  Note { amount, k, r }     text: 140 hex chars           │    │
//! │  │  • nullifier  = H(amount, k)                              │    │
//! │  │  • leaf value = H(amount, k, r)                           │    │
//! │  │  • commitment = H(leaf value)                             │    │
//! │  └──────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod commitment;
pub mod merkle;
pub mod mimc;
pub mod note;
pub mod nullifier;

pub use commitment::{Commitment, CommitmentScheme, pad_amount, pad_nonce};
pub use merkle::{EMPTY_LEAF_VALUE, MerkleError, MerkleHasher, MerkleProof, TREE_DEPTH};
pub use mimc::{MiMC, reduce_to_field};
pub use note::{NONCE_SIZE, NOTE_TEXT_LEN, Note, NoteError};
pub use nullifier::Nullifier;
