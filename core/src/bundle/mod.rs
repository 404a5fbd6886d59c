//! Transaction Group Builder
//!
//! Composes the atomic, ordered bundle a settlement submits.
//!
//! ```text
//! Deposit (8 ops)                          Withdrawal (8 ops)
//! ┌───┬──────────────────────────────┐     ┌───┬──────────────────────────────┐
//! │ 0 │ deposit call   (verifier key)│     │ 0 │ withdraw call  (verifier key)│
//! │ 1 │ payment leg    (user, fee)   │     │ 1 │ noop 0         (TSS, fee)    │
//! │ 2 │ noop 0         (TSS)         │     │ 2 │ noop 1         (TSS)         │
//! │ … │ …                            │     │ … │ …                            │
//! │ 7 │ noop 5         (TSS)         │     │ 7 │ noop 6         (TSS)         │
//! └───┴──────────────────────────────┘     └───┴──────────────────────────────┘
//! ```
//!
//! Padding exists only to reach the verifier's compute budget. The group id
//! is computed once, after the last padding op, and stamped on every op.

pub mod abi;
pub mod builder;
pub mod operation;

use thiserror::Error;

pub use builder::{GroupBuilder, ProtocolAccounts, WithdrawalRequest};
pub use operation::{GroupId, Operation, OperationId, OperationKind, SignedBundle, SignedOperation};

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("proof construction failed: {0}")]
    Proof(String),
    #[error("ledger parameters unavailable: {0}")]
    Params(String),
    #[error("argument encoding failed: {0}")]
    Encoding(String),
    #[error("accumulator proof failed: {0}")]
    Accumulator(String),
    #[error("bundle already finalized")]
    Finalized,
    #[error("bundle not finalized")]
    NotFinalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    Deposit,
    Withdrawal,
}

/// An ordered operation set. Once finalized it is immutable.
#[derive(Debug, Clone)]
pub struct Bundle {
    kind: BundleKind,
    operations: Vec<Operation>,
    group_id: Option<GroupId>,
}

impl Bundle {
    pub fn new(kind: BundleKind) -> Self {
        Self {
            kind,
            operations: Vec::new(),
            group_id: None,
        }
    }

    pub fn push(&mut self, operation: Operation) -> Result<(), BundleError> {
        if self.group_id.is_some() {
            return Err(BundleError::Finalized);
        }
        self.operations.push(operation);
        Ok(())
    }

    /// Compute the group id over the current operations and stamp it on
    /// each of them
    pub fn finalize(&mut self) -> Result<GroupId, BundleError> {
        if self.group_id.is_some() {
            return Err(BundleError::Finalized);
        }
        let group_id = GroupId::compute(&self.operations)?;
        for op in &mut self.operations {
            op.group = group_id.0;
        }
        self.group_id = Some(group_id);
        Ok(group_id)
    }

    pub fn kind(&self) -> BundleKind {
        self.kind
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn group_id(&self) -> Option<GroupId> {
        self.group_id
    }

    pub fn is_finalized(&self) -> bool {
        self.group_id.is_some()
    }

    /// Id of the proof-carrying call, which the ledger reports the
    /// settlement under
    pub fn settlement_id(&self) -> Result<OperationId, BundleError> {
        if !self.is_finalized() {
            return Err(BundleError::NotFinalized);
        }
        self.operations
            .first()
            .ok_or(BundleError::NotFinalized)?
            .id()
    }

    /// The value leg the user signs out of band (deposits only)
    pub fn payment_leg(&self) -> Option<&Operation> {
        self.operations.iter().find(|op| op.is_payment())
    }

    /// Positions of operations with a non-zero fee
    pub fn fee_carrying(&self) -> Vec<usize> {
        self.operations
            .iter()
            .enumerate()
            .filter(|(_, op)| op.fee > 0)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Address;

    fn noop(i: u8) -> Operation {
        Operation {
            sender: Address([1; 32]),
            fee: 0,
            first_valid: 1,
            last_valid: 11,
            group: [0u8; 32],
            kind: OperationKind::ProtocolCall {
                app_id: 1,
                args: vec![vec![i]],
                accounts: vec![],
                boxes: vec![],
            },
        }
    }

    #[test]
    fn test_finalize_stamps_every_operation() {
        let mut bundle = Bundle::new(BundleKind::Withdrawal);
        bundle.push(noop(0)).unwrap();
        bundle.push(noop(1)).unwrap();
        let group = bundle.finalize().unwrap();

        assert!(bundle.operations().iter().all(|op| op.group == group.0));
        assert_eq!(
            GroupId::compute(bundle.operations()).unwrap(),
            group,
            "recomputing over stamped operations reproduces the id"
        );
    }

    #[test]
    fn test_finalized_bundle_rejects_additions() {
        let mut bundle = Bundle::new(BundleKind::Deposit);
        bundle.push(noop(0)).unwrap();
        bundle.finalize().unwrap();

        assert!(matches!(bundle.push(noop(1)), Err(BundleError::Finalized)));
        assert!(matches!(bundle.finalize(), Err(BundleError::Finalized)));
        assert_eq!(bundle.len(), 1);
    }

    #[test]
    fn test_settlement_id_requires_finalize() {
        let mut bundle = Bundle::new(BundleKind::Deposit);
        bundle.push(noop(0)).unwrap();
        assert!(matches!(
            bundle.settlement_id(),
            Err(BundleError::NotFinalized)
        ));
        bundle.finalize().unwrap();
        assert_eq!(
            bundle.settlement_id().unwrap(),
            bundle.operations()[0].id().unwrap()
        );
    }
}
