//! Inclusion proofs against the confirmed commitment tree.
//!
//! The leaf list in the Confirmed Ledger Index is the only source of truth.
//! The tree is regenerated from it on demand and checked against the root the
//! ledger reported; nothing here computes a root the ledger has not seen.

use std::sync::Arc;

use shroud_privacy::{MerkleError, MerkleHasher, MerkleProof, Note};
use thiserror::Error;

use crate::storage::{ConfirmedIndex, RootRecord};

#[derive(Debug, Error)]
pub enum AccumulatorError {
    #[error("note has no leaf index")]
    Unconfirmed,
    #[error("confirmed index has no root yet")]
    EmptyTree,
    #[error("confirmed index unavailable: {0}")]
    Index(String),
    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

#[derive(Clone)]
pub struct Accumulator {
    index: Arc<dyn ConfirmedIndex>,
    hasher: MerkleHasher,
}

impl Accumulator {
    pub fn new(index: Arc<dyn ConfirmedIndex>) -> Self {
        Self::with_hasher(index, MerkleHasher::new())
    }

    pub fn with_hasher(index: Arc<dyn ConfirmedIndex>, hasher: MerkleHasher) -> Self {
        Self { index, hasher }
    }

    pub fn hasher(&self) -> &MerkleHasher {
        &self.hasher
    }

    /// Proof for a confirmed note against the index's current root
    pub fn proof_for(&self, note: &Note) -> Result<(MerkleProof, RootRecord), AccumulatorError> {
        let leaf_index = note.leaf_index.ok_or(AccumulatorError::Unconfirmed)?;
        self.proof_at(&note.leaf_value(), leaf_index)
    }

    pub fn proof_at(
        &self,
        leaf_value: &[u8; 32],
        leaf_index: u64,
    ) -> Result<(MerkleProof, RootRecord), AccumulatorError> {
        self.index
            .refresh()
            .map_err(|e| AccumulatorError::Index(format!("{e:#}")))?;

        // Root first: leaves appended after this read are ignored below
        let root = self
            .index
            .current_root()
            .map_err(|e| AccumulatorError::Index(format!("{e:#}")))?
            .ok_or(AccumulatorError::EmptyTree)?;

        if leaf_index >= root.leaf_count {
            return Err(MerkleError::IndexOutOfRange {
                index: leaf_index,
                leaf_count: root.leaf_count,
            }
            .into());
        }

        let mut leaves = self
            .index
            .all_leaf_commitments()
            .map_err(|e| AccumulatorError::Index(format!("{e:#}")))?;
        leaves.truncate(root.leaf_count as usize);

        let proof = self
            .hasher
            .get_proof(leaf_value, leaf_index, &root.root, &leaves)?;
        Ok((proof, root))
    }
}
