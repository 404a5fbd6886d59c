//! Merkle Accumulator for Note Commitments
//!
//! Append-only binary tree of fixed depth. The authoritative leaf list lives on
//! the ledger (mirrored by the confirmed ledger index); this module only
//! recomputes levels bottom-up from that list on demand, so there is no node
//! storage to keep in sync.
//!
//! ```text
//!                    Root                       level D
//!                   /    \
//!                 H01    H2z                    level 1
//!                /  \   /   \
//!               C0  C1 C2   Z0                  level 0 (commitments)
//!
//!   Z0     = H(empty leaf value)
//!   Z(i+1) = H(Zi, Zi)
//! ```
//!
//! An odd-length level is padded on the right with that level's zero hash, so
//! the depth never depends on how many notes exist.
//!
//! A proof is `[leaf_value, sibling_0, .., sibling_{D-1}]`. Entry 0 is the raw
//! leaf value (the preimage of the stored commitment), which is what the
//! withdrawal circuit opens.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mimc::MiMC;

/// Tree depth (supports 2^24 notes)
pub const TREE_DEPTH: usize = 24;

/// Leaf value of an unused slot
pub const EMPTY_LEAF_VALUE: [u8; 32] = [0u8; 32];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("leaf index {index} out of range: tree holds {leaf_count} leaves")]
    IndexOutOfRange { index: u64, leaf_count: u64 },
    #[error("leaf value does not hash to the commitment stored at index {index}")]
    LeafMismatch { index: u64 },
    #[error("recomputed root {computed} does not match expected root {expected}")]
    RootMismatch { computed: String, expected: String },
    #[error("{leaf_count} leaves exceed the capacity of a depth {depth} tree")]
    TreeFull { leaf_count: u64, depth: usize },
}

/// Inclusion proof for one leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    #[serde(with = "hex::serde")]
    pub leaf_value: [u8; 32],
    pub leaf_index: u64,
    /// Sibling hashes from leaf level to just below the root
    pub siblings: Vec<[u8; 32]>,
}

impl MerkleProof {
    /// Proof in circuit layout: leaf value first, then siblings
    pub fn path(&self) -> Vec<[u8; 32]> {
        let mut path = Vec::with_capacity(self.siblings.len() + 1);
        path.push(self.leaf_value);
        path.extend_from_slice(&self.siblings);
        path
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.siblings.len() + 1
    }

    /// Recompute the root this proof commits to
    pub fn compute_root(&self, hasher: &MerkleHasher) -> [u8; 32] {
        let mut current = hasher.commit_leaf(&self.leaf_value);
        let mut index = self.leaf_index;

        for sibling in &self.siblings {
            current = if index & 1 == 0 {
                hasher.hash_pair(&current, sibling)
            } else {
                hasher.hash_pair(sibling, &current)
            };
            index >>= 1;
        }

        current
    }

    pub fn verify(&self, hasher: &MerkleHasher, root: &[u8; 32]) -> bool {
        &self.compute_root(hasher) == root
    }
}

/// MiMC-based tree hasher with precomputed zero hashes
#[derive(Debug, Clone)]
pub struct MerkleHasher {
    mimc: MiMC,
    depth: usize,
    /// zero_hashes[i] is the root of an empty subtree of height i
    zero_hashes: Vec<[u8; 32]>,
}

impl Default for MerkleHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleHasher {
    pub fn new() -> Self {
        Self::with_depth(TREE_DEPTH)
    }

    pub fn with_depth(depth: usize) -> Self {
        let mimc = MiMC::new();
        let mut zero_hashes = Vec::with_capacity(depth + 1);
        let mut current = mimc.hash(&[EMPTY_LEAF_VALUE]);
        zero_hashes.push(current);
        for _ in 0..depth {
            current = mimc.hash_pair(&current, &current);
            zero_hashes.push(current);
        }

        Self {
            mimc,
            depth,
            zero_hashes,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn zero_hash(&self, level: usize) -> &[u8; 32] {
        &self.zero_hashes[level.min(self.depth)]
    }

    pub fn hash_pair(&self, left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
        self.mimc.hash_pair(left, right)
    }

    /// Commitment stored in the tree for a given leaf value
    pub fn commit_leaf(&self, leaf_value: &[u8; 32]) -> [u8; 32] {
        self.mimc.hash(&[*leaf_value])
    }

    /// Root over the ordered commitment list
    pub fn compute_root(&self, leaves: &[[u8; 32]]) -> Result<[u8; 32], MerkleError> {
        self.check_capacity(leaves.len())?;
        if leaves.is_empty() {
            return Ok(self.zero_hashes[self.depth]);
        }

        let mut level = leaves.to_vec();
        for i in 0..self.depth {
            level = self.next_level(level, i);
        }
        Ok(level[0])
    }

    /// Build an inclusion proof for `leaf_value` at `leaf_index` and check it
    /// against `expected_root`.
    ///
    /// Fails without returning a proof if the index is outside `leaves`, if
    /// `H(leaf_value)` is not the commitment stored there, or if the
    /// recomputed root differs from `expected_root`.
    pub fn get_proof(
        &self,
        leaf_value: &[u8; 32],
        leaf_index: u64,
        expected_root: &[u8; 32],
        leaves: &[[u8; 32]],
    ) -> Result<MerkleProof, MerkleError> {
        let leaf_count = leaves.len() as u64;
        if leaf_index >= leaf_count {
            return Err(MerkleError::IndexOutOfRange {
                index: leaf_index,
                leaf_count,
            });
        }
        self.check_capacity(leaves.len())?;

        if self.commit_leaf(leaf_value) != leaves[leaf_index as usize] {
            return Err(MerkleError::LeafMismatch { index: leaf_index });
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut level = leaves.to_vec();
        let mut index = leaf_index as usize;

        for i in 0..self.depth {
            if level.len() % 2 == 1 {
                level.push(self.zero_hashes[i]);
            }
            let sibling = if index & 1 == 0 {
                level[index + 1]
            } else {
                level[index - 1]
            };
            siblings.push(sibling);

            level = self.next_level(level, i);
            index >>= 1;
        }

        let computed = level[0];
        if level.len() != 1 || &computed != expected_root {
            return Err(MerkleError::RootMismatch {
                computed: hex::encode(computed),
                expected: hex::encode(expected_root),
            });
        }

        Ok(MerkleProof {
            leaf_value: *leaf_value,
            leaf_index,
            siblings,
        })
    }

    fn next_level(&self, mut level: Vec<[u8; 32]>, height: usize) -> Vec<[u8; 32]> {
        if level.len() % 2 == 1 {
            level.push(self.zero_hashes[height]);
        }
        level
            .chunks_exact(2)
            .map(|pair| self.hash_pair(&pair[0], &pair[1]))
            .collect()
    }

    fn check_capacity(&self, leaf_count: usize) -> Result<(), MerkleError> {
        if leaf_count as u64 > self.capacity() {
            return Err(MerkleError::TreeFull {
                leaf_count: leaf_count as u64,
                depth: self.depth,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_values(n: usize) -> Vec<[u8; 32]> {
        (0..n)
            .map(|i| {
                let mut v = [0u8; 32];
                v[24..].copy_from_slice(&(i as u64 + 1).to_be_bytes());
                v
            })
            .collect()
    }

    fn commitments(hasher: &MerkleHasher, values: &[[u8; 32]]) -> Vec<[u8; 32]> {
        values.iter().map(|v| hasher.commit_leaf(v)).collect()
    }

    /// Root of a fully materialised tree of 2^depth leaves
    fn reference_root(hasher: &MerkleHasher, leaves: &[[u8; 32]]) -> [u8; 32] {
        let mut level = leaves.to_vec();
        level.resize(1 << hasher.depth(), *hasher.zero_hash(0));
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|p| hasher.hash_pair(&p[0], &p[1]))
                .collect();
        }
        level[0]
    }

    #[test]
    fn test_zero_hashes_chain() {
        let hasher = MerkleHasher::with_depth(4);
        assert_eq!(*hasher.zero_hash(0), hasher.commit_leaf(&EMPTY_LEAF_VALUE));
        for i in 1..=4 {
            let prev = hasher.zero_hash(i - 1);
            assert_eq!(*hasher.zero_hash(i), hasher.hash_pair(prev, prev));
        }
    }

    #[test]
    fn test_empty_tree_root() {
        let hasher = MerkleHasher::with_depth(4);
        assert_eq!(hasher.compute_root(&[]).unwrap(), *hasher.zero_hash(4));
        assert_eq!(reference_root(&hasher, &[]), *hasher.zero_hash(4));
    }

    #[test]
    fn test_odd_levels_match_reference() {
        let hasher = MerkleHasher::with_depth(4);
        for n in [1, 3, 5, 7, 16] {
            let leaves = commitments(&hasher, &leaf_values(n));
            assert_eq!(
                hasher.compute_root(&leaves).unwrap(),
                reference_root(&hasher, &leaves),
                "root mismatch for {n} leaves"
            );
        }
    }

    #[test]
    fn test_proof_for_every_index() {
        let hasher = MerkleHasher::new();
        let values = leaf_values(7);
        let leaves = commitments(&hasher, &values);
        let root = hasher.compute_root(&leaves).unwrap();

        for (i, value) in values.iter().enumerate() {
            let proof = hasher.get_proof(value, i as u64, &root, &leaves).unwrap();
            assert_eq!(proof.len(), TREE_DEPTH + 1);
            assert_eq!(proof.path()[0], *value);
            assert!(proof.verify(&hasher, &root), "proof {i} does not verify");
        }
    }

    #[test]
    fn test_proof_index_out_of_range() {
        let hasher = MerkleHasher::with_depth(4);
        let values = leaf_values(3);
        let leaves = commitments(&hasher, &values);
        let root = hasher.compute_root(&leaves).unwrap();

        assert_eq!(
            hasher.get_proof(&values[0], 3, &root, &leaves),
            Err(MerkleError::IndexOutOfRange {
                index: 3,
                leaf_count: 3
            })
        );
    }

    #[test]
    fn test_proof_leaf_mismatch() {
        let hasher = MerkleHasher::with_depth(4);
        let values = leaf_values(3);
        let leaves = commitments(&hasher, &values);
        let root = hasher.compute_root(&leaves).unwrap();

        assert_eq!(
            hasher.get_proof(&values[1], 0, &root, &leaves),
            Err(MerkleError::LeafMismatch { index: 0 })
        );
    }

    #[test]
    fn test_proof_rejects_stale_root() {
        let hasher = MerkleHasher::with_depth(4);
        let values = leaf_values(4);
        let mut leaves = commitments(&hasher, &values[..3]);
        let stale_root = hasher.compute_root(&leaves).unwrap();

        leaves.push(hasher.commit_leaf(&values[3]));
        let result = hasher.get_proof(&values[0], 0, &stale_root, &leaves);
        assert!(matches!(result, Err(MerkleError::RootMismatch { .. })));

        let fresh_root = hasher.compute_root(&leaves).unwrap();
        assert!(hasher.get_proof(&values[0], 0, &fresh_root, &leaves).is_ok());
    }

    #[test]
    fn test_tree_full() {
        let hasher = MerkleHasher::with_depth(2);
        let leaves = commitments(&hasher, &leaf_values(5));
        assert!(matches!(
            hasher.compute_root(&leaves),
            Err(MerkleError::TreeFull { leaf_count: 5, depth: 2 })
        ));
    }

    #[test]
    fn test_tampered_sibling_fails_verification() {
        let hasher = MerkleHasher::with_depth(4);
        let values = leaf_values(5);
        let leaves = commitments(&hasher, &values);
        let root = hasher.compute_root(&leaves).unwrap();

        let mut proof = hasher.get_proof(&values[4], 4, &root, &leaves).unwrap();
        proof.siblings[1][31] ^= 1;
        assert!(!proof.verify(&hasher, &root));
    }
}
