//! Proof System Seam
//!
//! The circuit is opaque here: a prover turns a witness into on-chain-ready
//! argument bytes (proof blocks and public inputs, both `byte[32][]`).

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha512_256};
use shroud_privacy::{MerkleProof, Note, pad_amount, reduce_to_field};

use crate::bundle::abi;
use crate::ledger::Address;

/// Private and public inputs for one proof
#[derive(Debug, Clone)]
pub enum Witness {
    Deposit {
        note: Note,
    },
    Withdrawal {
        note: Note,
        change: Note,
        recipient: Address,
        amount: u64,
        fee: u64,
        root: [u8; 32],
        path: MerkleProof,
    },
}

impl Witness {
    /// Public inputs in the order the verifier reads them.
    ///
    /// Deposit: `[amount, commitment]`.
    /// Withdrawal: `[recipient, amount, fee, change commitment, nullifier, root]`,
    /// with the recipient address reduced into the field.
    pub fn public_inputs(&self) -> Vec<[u8; 32]> {
        match self {
            Witness::Deposit { note } => vec![pad_amount(note.amount), note.commitment().0],
            Witness::Withdrawal {
                note,
                change,
                recipient,
                amount,
                fee,
                root,
                ..
            } => vec![
                reduce_to_field(recipient.as_bytes()),
                pad_amount(*amount),
                pad_amount(*fee),
                change.commitment().0,
                note.nullifier().0,
                *root,
            ],
        }
    }

    pub fn circuit(&self) -> &'static str {
        match self {
            Witness::Deposit { .. } => "deposit",
            Witness::Withdrawal { .. } => "withdrawal",
        }
    }
}

/// Proof blocks plus the public inputs they were produced for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZkArgs {
    pub proof: Vec<[u8; 32]>,
    pub public_inputs: Vec<[u8; 32]>,
}

impl ZkArgs {
    pub fn proof_arg(&self) -> Result<Vec<u8>, abi::AbiError> {
        abi::encode_byte32_array(&self.proof)
    }

    pub fn public_inputs_arg(&self) -> Result<Vec<u8>, abi::AbiError> {
        abi::encode_byte32_array(&self.public_inputs)
    }
}

#[async_trait]
pub trait Prover: Send + Sync {
    async fn prove(&self, witness: &Witness) -> Result<ZkArgs>;
}

// ============================================================================
// Mock Prover
// ============================================================================

/// Deterministic stand-in: the "proof" is a keyed digest of the public
/// inputs, which `MockLedger` checks with [`MockProver::expected_proof`].
pub struct MockProver;

const MOCK_PROOF_BLOCKS: u8 = 4;

impl MockProver {
    pub fn expected_proof(circuit: &str, public_inputs: &[[u8; 32]]) -> Vec<[u8; 32]> {
        (0..MOCK_PROOF_BLOCKS)
            .map(|i| {
                let mut hasher = Sha512_256::new();
                hasher.update(b"shroud-mock-proof");
                hasher.update(circuit.as_bytes());
                hasher.update([i]);
                for input in public_inputs {
                    hasher.update(input);
                }
                hasher.finalize().into()
            })
            .collect()
    }
}

#[async_trait]
impl Prover for MockProver {
    async fn prove(&self, witness: &Witness) -> Result<ZkArgs> {
        let public_inputs = witness.public_inputs();
        Ok(ZkArgs {
            proof: Self::expected_proof(witness.circuit(), &public_inputs),
            public_inputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_public_inputs() {
        let note = Note::from_parts(5_000_000, [1; 31], [2; 31]);
        let inputs = Witness::Deposit { note: note.clone() }.public_inputs();
        assert_eq!(inputs, vec![pad_amount(5_000_000), note.commitment().0]);
    }

    #[tokio::test]
    async fn test_mock_prover_deterministic() {
        let witness = Witness::Deposit {
            note: Note::from_parts(7, [3; 31], [4; 31]),
        };
        let a = MockProver.prove(&witness).await.unwrap();
        let b = MockProver.prove(&witness).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.proof.len(), MOCK_PROOF_BLOCKS as usize);
        assert_ne!(
            MockProver::expected_proof("withdrawal", &a.public_inputs),
            a.proof
        );
    }
}
