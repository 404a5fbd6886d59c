//! Persistence
//!
//! ```text
//! ┌────────────────────────────────┐      ┌────────────────────────────────┐
//! │ NoteStore (core, read-write)   │      │ LedgerIndex (indexer, writer)  │
//! │  pending_intents  id → intent  │      │  leaves       idx → commitment │
//! │  notes            idx → note   │      │  commitments  c   → idx        │
//! │  notes_by_settlement id → idx  │      │  nullifiers   n   → txn id     │
//! │  meta                          │      │  txns         id  → txn        │
//! └────────────────────────────────┘      │  meta  root / last_round / ... │
//!                                         └───────────────┬────────────────┘
//!                                                         │ secondary
//!                                          LedgerIndexReader (core, read-only)
//! ```
//!
//! Keys that order (indices, ids) are big-endian u64; values are JSON.

pub mod ledger_index;
pub mod note_store;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shroud_privacy::{Commitment, Nullifier};

pub use ledger_index::{AppendOutcome, IndexStats, LedgerIndex, LedgerIndexReader};
pub use note_store::{NoteStore, PromoteOutcome};

/// Root and leaf count as last reported by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRecord {
    #[serde(with = "hex::serde")]
    pub root: [u8; 32],
    pub leaf_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnKind {
    Deposit,
    Withdrawal,
}

/// A confirmed pool call and the leaf it inserted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedTxn {
    pub leaf_index: u64,
    pub commitment: Commitment,
    pub settlement_id: String,
    pub kind: TxnKind,
    /// Depositor or withdrawal recipient (base58)
    pub address: String,
    pub amount: u64,
    /// Nullifier spent by a withdrawal
    pub from_nullifier: Option<Nullifier>,
}

/// Read side of the Confirmed Ledger Index
pub trait ConfirmedIndex: Send + Sync {
    /// Pull in writes made since the last call. No-op for the writer itself.
    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    /// Every leaf commitment, ordered by leaf index
    fn all_leaf_commitments(&self) -> Result<Vec<[u8; 32]>>;

    fn current_root(&self) -> Result<Option<RootRecord>>;

    fn leaf_index_by_commitment(&self, commitment: &Commitment) -> Result<Option<u64>>;

    fn confirmed_by_settlement_id(&self, settlement_id: &str) -> Result<Option<ConfirmedTxn>>;

    fn is_spent(&self, nullifier: &Nullifier) -> Result<bool>;
}

/// A submitted note the ledger has not yet been seen to confirm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingIntent {
    pub id: u64,
    pub commitment: Commitment,
    pub nullifier: Nullifier,
    pub settlement_id: String,
    pub created_at: DateTime<Utc>,
}

impl PendingIntent {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// A note with its ledger-assigned position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedNote {
    pub leaf_index: u64,
    pub commitment: Commitment,
    pub nullifier: Nullifier,
    pub settlement_id: String,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shroud_privacy::{MerkleHasher, Note};

    /// In-memory index for components that only read
    pub(crate) struct MemoryIndex {
        pub leaves: Vec<[u8; 32]>,
        pub root: Option<RootRecord>,
        pub txns: Vec<ConfirmedTxn>,
    }

    impl MemoryIndex {
        pub fn from_notes(hasher: &MerkleHasher, notes: &[Note]) -> Self {
            let leaves: Vec<[u8; 32]> = notes.iter().map(|n| n.commitment().0).collect();
            let root = (!leaves.is_empty()).then(|| RootRecord {
                root: hasher.compute_root(&leaves).unwrap(),
                leaf_count: leaves.len() as u64,
            });
            Self {
                leaves,
                root,
                txns: Vec::new(),
            }
        }
    }

    impl ConfirmedIndex for MemoryIndex {
        fn all_leaf_commitments(&self) -> Result<Vec<[u8; 32]>> {
            Ok(self.leaves.clone())
        }

        fn current_root(&self) -> Result<Option<RootRecord>> {
            Ok(self.root)
        }

        fn leaf_index_by_commitment(&self, commitment: &Commitment) -> Result<Option<u64>> {
            Ok(self
                .leaves
                .iter()
                .position(|l| l == commitment.as_bytes())
                .map(|i| i as u64))
        }

        fn confirmed_by_settlement_id(&self, settlement_id: &str) -> Result<Option<ConfirmedTxn>> {
            Ok(self
                .txns
                .iter()
                .find(|t| t.settlement_id == settlement_id)
                .cloned())
        }

        fn is_spent(&self, nullifier: &Nullifier) -> Result<bool> {
            Ok(self
                .txns
                .iter()
                .any(|t| t.from_nullifier.as_ref() == Some(nullifier)))
        }
    }
}
