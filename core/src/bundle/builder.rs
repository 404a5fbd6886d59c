use std::sync::Arc;

use shroud_privacy::Note;
use tracing::debug;

use super::abi::{self, DEPOSIT_METHOD, NOOP_METHOD, WITHDRAW_METHOD};
use super::{Bundle, BundleError, BundleKind, Operation, OperationKind};
use crate::accumulator::Accumulator;
use crate::ledger::{Address, LedgerClient, SuggestedParams};
use crate::params::ProtocolParams;
use crate::settlement::{Prover, Witness, ZkArgs};

const SUBTREE_BOX: &[u8] = b"subtree";
const ROOTS_BOX: &[u8] = b"roots";

/// Position of the recipient in a withdraw call's account references
/// (0 is the sender, 1 the TSS account)
const RECIPIENT_ACCOUNT_POSITION: u8 = 2;

/// Accounts that sign protocol-side operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolAccounts {
    pub deposit_verifier: Address,
    pub withdrawal_verifier: Address,
    pub tss: Address,
}

/// Inputs to a withdrawal bundle. `note` must carry its leaf index.
#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    pub note: Note,
    pub change: Note,
    pub recipient: Address,
    pub amount: u64,
    pub fee: u64,
}

pub struct GroupBuilder {
    ledger: Arc<dyn LedgerClient>,
    prover: Arc<dyn Prover>,
    accumulator: Accumulator,
    accounts: ProtocolAccounts,
    params: ProtocolParams,
}

impl GroupBuilder {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        prover: Arc<dyn Prover>,
        accumulator: Accumulator,
        accounts: ProtocolAccounts,
        params: ProtocolParams,
    ) -> Self {
        Self {
            ledger,
            prover,
            accumulator,
            accounts,
            params,
        }
    }

    pub fn accounts(&self) -> &ProtocolAccounts {
        &self.accounts
    }

    /// Deposit call, the payer's unsigned payment leg, then padding.
    /// The payment leg carries the bundle's fee.
    pub async fn build_deposit(
        &self,
        amount: u64,
        payer: Address,
        note: &Note,
    ) -> Result<Bundle, BundleError> {
        let sp = self.suggested_params().await?;
        let zk = self.prove(&Witness::Deposit { note: note.clone() }).await?;

        let mut bundle = Bundle::new(BundleKind::Deposit);
        bundle.push(self.operation(
            self.accounts.deposit_verifier,
            0,
            &sp,
            OperationKind::ProtocolCall {
                app_id: self.params.app_id,
                args: vec![
                    abi::method_selector(DEPOSIT_METHOD).to_vec(),
                    encoded(zk.proof_arg())?,
                    encoded(zk.public_inputs_arg())?,
                    payer.as_bytes().to_vec(),
                ],
                accounts: vec![],
                boxes: vec![
                    SUBTREE_BOX.to_vec(),
                    SUBTREE_BOX.to_vec(),
                    ROOTS_BOX.to_vec(),
                    ROOTS_BOX.to_vec(),
                ],
            },
        )?)?;
        let fee = bundle_fee(sp.min_fee, self.params.deposit_fee_multiplier)?;
        bundle.push(self.operation(
            payer,
            fee,
            &sp,
            OperationKind::Payment {
                receiver: self.params.app_address,
                amount,
            },
        )?)?;
        self.pad(&mut bundle, &sp, None)?;
        bundle.finalize()?;

        debug!(
            group = %bundle.group_id().map(|g| g.to_hex()).unwrap_or_default(),
            ops = bundle.len(),
            "built deposit bundle"
        );
        Ok(bundle)
    }

    /// Withdraw call referencing the nullifier box and recipient, then
    /// padding. The first padding op carries the bundle's fee.
    pub async fn build_withdrawal(&self, request: &WithdrawalRequest) -> Result<Bundle, BundleError> {
        let sp = self.suggested_params().await?;

        let (path, root) = self
            .accumulator
            .proof_for(&request.note)
            .map_err(|e| BundleError::Accumulator(e.to_string()))?;

        let nullifier = request.note.nullifier();
        let zk = self
            .prove(&Witness::Withdrawal {
                note: request.note.clone(),
                change: request.change.clone(),
                recipient: request.recipient,
                amount: request.amount,
                fee: request.fee,
                root: root.root,
                path,
            })
            .await?;

        let mut bundle = Bundle::new(BundleKind::Withdrawal);
        bundle.push(self.operation(
            self.accounts.withdrawal_verifier,
            0,
            &sp,
            OperationKind::ProtocolCall {
                app_id: self.params.app_id,
                args: vec![
                    abi::method_selector(WITHDRAW_METHOD).to_vec(),
                    encoded(zk.proof_arg())?,
                    encoded(zk.public_inputs_arg())?,
                    vec![RECIPIENT_ACCOUNT_POSITION],
                    abi::encode_bool(false),
                    abi::encode_u64(0),
                ],
                accounts: vec![self.accounts.tss, request.recipient],
                boxes: vec![
                    nullifier.as_bytes().to_vec(),
                    SUBTREE_BOX.to_vec(),
                    ROOTS_BOX.to_vec(),
                    ROOTS_BOX.to_vec(),
                ],
            },
        )?)?;
        let fee = bundle_fee(sp.min_fee, self.params.withdrawal_fee_multiplier)?;
        self.pad(&mut bundle, &sp, Some(fee))?;
        bundle.finalize()?;

        debug!(
            group = %bundle.group_id().map(|g| g.to_hex()).unwrap_or_default(),
            ops = bundle.len(),
            "built withdrawal bundle"
        );
        Ok(bundle)
    }

    async fn suggested_params(&self) -> Result<SuggestedParams, BundleError> {
        self.ledger
            .suggested_params()
            .await
            .map_err(|e| BundleError::Params(format!("{e:#}")))
    }

    async fn prove(&self, witness: &Witness) -> Result<ZkArgs, BundleError> {
        self.prover
            .prove(witness)
            .await
            .map_err(|e| BundleError::Proof(format!("{e:#}")))
    }

    fn operation(
        &self,
        sender: Address,
        fee: u64,
        sp: &SuggestedParams,
        kind: OperationKind,
    ) -> Result<Operation, BundleError> {
        let last_valid = sp
            .first_valid
            .checked_add(self.params.wait_rounds)
            .ok_or_else(|| BundleError::Params("validity window overflow".into()))?;
        Ok(Operation {
            sender,
            fee,
            first_valid: sp.first_valid,
            last_valid,
            group: [0u8; 32],
            kind,
        })
    }

    /// Fill the bundle to the budget with TSS noops, each with a distinct
    /// counter so their ids differ
    fn pad(&self, bundle: &mut Bundle, sp: &SuggestedParams, first_fee: Option<u64>) -> Result<(), BundleError> {
        let padding = self.params.budget_operations.saturating_sub(bundle.len());
        for i in 0..padding {
            let counter = u8::try_from(i)
                .map_err(|_| BundleError::Encoding(format!("padding counter {i} exceeds a byte")))?;
            let fee = if i == 0 { first_fee.unwrap_or(0) } else { 0 };
            bundle.push(self.operation(
                self.accounts.tss,
                fee,
                sp,
                OperationKind::ProtocolCall {
                    app_id: self.params.app_id,
                    args: vec![abi::method_selector(NOOP_METHOD).to_vec(), vec![counter]],
                    accounts: vec![],
                    boxes: vec![],
                },
            )?)?;
        }
        Ok(())
    }
}

fn bundle_fee(min_fee: u64, multiplier: u64) -> Result<u64, BundleError> {
    min_fee
        .checked_mul(multiplier)
        .ok_or_else(|| BundleError::Params("fee overflow".into()))
}

fn encoded(arg: Result<Vec<u8>, abi::AbiError>) -> Result<Vec<u8>, BundleError> {
    arg.map_err(|e| BundleError::Encoding(e.to_string()))
}
