//! Settlement Engine
//!
//! ```text
//! Built ──sign──▶ Submitted ──wait──▶ Confirmed { leaf_index, root }
//!                     │                  │
//!                     │ submit error     │ wait error / shutdown
//!                     ▼                  ▼
//!     Rejected | OverSpent | Expired |  TimedOut | Rejected | InternalError
//!     BelowMinimumBalance | InternalError
//! ```
//!
//! Every terminal state except `TimedOut` is final; nothing here retries.

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::classify::{FailureKind, SettlementFailure, classify_submit_error, classify_wait_error};
use super::keys::ProtocolKeys;
use crate::bundle::abi;
use crate::bundle::{Bundle, BundleKind, SignedBundle, SignedOperation};
use crate::ledger::LedgerClient;

/// What the ledger reported for a confirmed bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub settlement_id: String,
    pub leaf_index: u64,
    pub root: [u8; 32],
    pub confirmed_round: u64,
}

pub type SettlementOutcome = Result<Confirmation, SettlementFailure>;

/// Whether the pending intent for this outcome should be deleted now.
/// Only an unknown outcome is left for the reconciler.
pub fn should_clear_intent(outcome: &SettlementOutcome) -> bool {
    !matches!(outcome, Err(failure) if failure.kind == FailureKind::TimedOut)
}

pub struct SettlementEngine {
    ledger: Arc<dyn LedgerClient>,
    keys: Arc<ProtocolKeys>,
    wait_rounds: u64,
    shutdown: CancellationToken,
}

impl SettlementEngine {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        keys: Arc<ProtocolKeys>,
        wait_rounds: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ledger,
            keys,
            wait_rounds,
            shutdown,
        }
    }

    /// Sign, submit and await a finalized bundle.
    ///
    /// `user_leg` is the payer's signed payment (deposits); it must be the
    /// bundle's own payment operation, byte for byte.
    pub async fn settle(&self, bundle: &Bundle, user_leg: Option<&SignedOperation>) -> SettlementOutcome {
        let settlement_id = bundle
            .settlement_id()
            .map_err(|e| SettlementFailure::internal(e.to_string()))?
            .to_hex();

        let signed = self.sign(bundle, user_leg)?;
        let bytes = signed
            .to_bytes()
            .map_err(|e| SettlementFailure::internal(e.to_string()))?;

        if let Err(e) = self.ledger.submit_bundle(&bytes).await {
            let failure = classify_submit_error(&format!("{e:#}"));
            warn!(settlement = %settlement_id, kind = %failure.kind, error = %failure.message, "submit failed");
            return Err(failure);
        }
        info!(settlement = %settlement_id, ops = bundle.len(), "bundle submitted");

        let receipt = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                warn!(settlement = %settlement_id, "shutdown while awaiting confirmation");
                return Err(SettlementFailure::new(
                    FailureKind::TimedOut,
                    "shutdown before confirmation",
                ));
            }
            result = self.ledger.wait_for_confirmation(&settlement_id, self.wait_rounds) => {
                result.map_err(|e| {
                    let failure = classify_wait_error(&format!("{e:#}"));
                    warn!(settlement = %settlement_id, kind = %failure.kind, error = %failure.message, "confirmation failed");
                    failure
                })?
            }
        };

        let log = receipt.logs.last().ok_or_else(|| {
            SettlementFailure::internal(format!("settlement {settlement_id} confirmed without logs"))
        })?;
        let (leaf_index, root) = abi::decode_return(log)
            .map_err(|e| SettlementFailure::internal(format!("settlement {settlement_id}: {e}")))?;

        info!(
            settlement = %settlement_id,
            leaf_index,
            round = receipt.confirmed_round,
            "settlement confirmed"
        );
        Ok(Confirmation {
            settlement_id,
            leaf_index,
            root,
            confirmed_round: receipt.confirmed_round,
        })
    }

    /// Verifier key on the proof-carrying call, the user's signature on the
    /// payment leg, TSS on everything else
    fn sign(&self, bundle: &Bundle, user_leg: Option<&SignedOperation>) -> Result<SignedBundle, SettlementFailure> {
        let verifier: &SigningKey = match bundle.kind() {
            BundleKind::Deposit => &self.keys.deposit_verifier,
            BundleKind::Withdrawal => &self.keys.withdrawal_verifier,
        };

        let mut operations = Vec::with_capacity(bundle.len());
        for (i, op) in bundle.operations().iter().enumerate() {
            let signed = if i == 0 {
                SignedOperation::sign(op.clone(), verifier)
                    .map_err(|e| SettlementFailure::internal(e.to_string()))?
            } else if op.is_payment() {
                let leg = user_leg
                    .ok_or_else(|| SettlementFailure::internal("payment leg is not signed"))?;
                if leg.operation != *op {
                    return Err(SettlementFailure::internal(
                        "signed payment does not match the bundle",
                    ));
                }
                if !leg.verify() {
                    return Err(SettlementFailure::internal("invalid payment signature"));
                }
                leg.clone()
            } else {
                SignedOperation::sign(op.clone(), &self.keys.tss)
                    .map_err(|e| SettlementFailure::internal(e.to_string()))?
            };
            operations.push(signed);
        }

        Ok(SignedBundle { operations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_rule_for_every_outcome() {
        let confirmed: SettlementOutcome = Ok(Confirmation {
            settlement_id: "s".into(),
            leaf_index: 0,
            root: [0; 32],
            confirmed_round: 1,
        });
        assert!(should_clear_intent(&confirmed));

        for kind in [
            FailureKind::Rejected,
            FailureKind::OverSpent,
            FailureKind::Expired,
            FailureKind::BelowMinimumBalance,
            FailureKind::InternalError,
        ] {
            assert!(should_clear_intent(&Err(SettlementFailure::new(kind, "x"))));
        }
        assert!(!should_clear_intent(&Err(SettlementFailure::new(
            FailureKind::TimedOut,
            "x"
        ))));
    }
}
