use std::sync::Arc;

use log::{error, info, warn};
use shroud_privacy::Note;

use super::ServiceError;
use crate::bundle::{
    Bundle, BundleError, GroupBuilder, GroupId, Operation, SignedOperation, WithdrawalRequest,
};
use crate::ledger::Address;
use crate::params::ProtocolParams;
use crate::session::SessionCache;
use crate::settlement::{Confirmation, SettlementEngine, SettlementOutcome, should_clear_intent};
use crate::storage::{ConfirmedIndex, ConfirmedNote, NoteStore, PromoteOutcome};

/// A built deposit waiting for the payer's signature
#[derive(Debug)]
pub struct DepositSession {
    pub bundle: Bundle,
    pub note: Note,
}

/// Returned by `prepare_deposit`. The payer signs `payment` and hands it back
/// with the group id.
#[derive(Debug, Clone)]
pub struct PreparedDeposit {
    pub group_id: GroupId,
    pub note: Note,
    pub payment: Operation,
}

/// A checked withdrawal, ready to build
#[derive(Debug, Clone)]
pub struct WithdrawalQuote {
    /// The note being spent, with its leaf index
    pub note: Note,
    pub change: Note,
    pub recipient: Address,
    pub amount: u64,
    pub fee: u64,
}

#[derive(Debug, Clone)]
pub struct WithdrawalReceipt {
    /// The change note, confirmed
    pub change: Note,
    pub amount: u64,
    pub fee: u64,
    pub settlement_id: String,
}

/// Deletes a pending intent when dropped, unless told to keep it
struct IntentGuard<'a> {
    store: &'a NoteStore,
    id: u64,
    armed: bool,
}

impl<'a> IntentGuard<'a> {
    fn new(store: &'a NoteStore, id: u64) -> Self {
        Self {
            store,
            id,
            armed: true,
        }
    }

    /// Leave the intent for the reconciler
    fn keep(&mut self) {
        self.armed = false;
    }
}

impl Drop for IntentGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.store.delete_intent(self.id) {
            warn!("Failed to clear pending intent {}: {e:#}", self.id);
        }
    }
}

pub struct PoolService {
    params: ProtocolParams,
    builder: GroupBuilder,
    engine: SettlementEngine,
    store: NoteStore,
    index: Arc<dyn ConfirmedIndex>,
    sessions: Arc<SessionCache<DepositSession>>,
}

impl PoolService {
    pub fn new(
        params: ProtocolParams,
        builder: GroupBuilder,
        engine: SettlementEngine,
        store: NoteStore,
        index: Arc<dyn ConfirmedIndex>,
        sessions: Arc<SessionCache<DepositSession>>,
    ) -> Self {
        Self {
            params,
            builder,
            engine,
            store,
            index,
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionCache<DepositSession>> {
        &self.sessions
    }

    pub fn store(&self) -> &NoteStore {
        &self.store
    }

    // =========================================================================
    // Deposit
    // =========================================================================

    pub async fn prepare_deposit(
        &self,
        amount: u64,
        payer: Address,
    ) -> Result<PreparedDeposit, ServiceError> {
        if amount < self.params.deposit_minimum {
            return Err(ServiceError::BelowMinimum {
                amount,
                minimum: self.params.deposit_minimum,
            });
        }

        let note = Note::generate(amount);
        let bundle = self.builder.build_deposit(amount, payer, &note).await?;
        let group_id = bundle
            .group_id()
            .ok_or(BundleError::NotFinalized)?;
        let payment = bundle
            .payment_leg()
            .cloned()
            .ok_or_else(|| BundleError::Params("deposit has no payment leg".into()))?;

        info!("Prepared deposit {} of {} from {}", group_id, amount, payer);
        self.sessions.insert(
            group_id,
            DepositSession {
                bundle,
                note: note.clone(),
            },
        );

        Ok(PreparedDeposit {
            group_id,
            note,
            payment,
        })
    }

    /// Settle a prepared deposit. Returns the note with its leaf index.
    pub async fn confirm_deposit(
        &self,
        group_id: &GroupId,
        signed_payment: &SignedOperation,
        note_text: &str,
    ) -> Result<Note, ServiceError> {
        let session = self
            .sessions
            .take(group_id)
            .ok_or_else(|| ServiceError::SessionNotFound(group_id.to_hex()))?;

        let note = Note::parse_text(note_text)?;
        if note.commitment() != session.note.commitment() {
            return Err(ServiceError::NoteMismatch);
        }

        let confirmation = self
            .settle_note(&session.bundle, Some(signed_payment), &note)
            .await?;
        Ok(note
            .with_leaf_index(confirmation.leaf_index)
            .with_settlement_id(confirmation.settlement_id))
    }

    // =========================================================================
    // Withdrawal
    // =========================================================================

    /// Validate a withdrawal against the index and derive the change note
    pub fn prepare_withdrawal(
        &self,
        amount: u64,
        recipient: Address,
        note_text: &str,
    ) -> Result<WithdrawalQuote, ServiceError> {
        let note = Note::parse_text(note_text)?;

        self.index.refresh()?;
        let leaf_index = self
            .index
            .leaf_index_by_commitment(&note.commitment())?
            .ok_or(ServiceError::NoteNotFound)?;
        if self.index.is_spent(&note.nullifier())? {
            return Err(ServiceError::NoteSpent);
        }

        let fee = self.params.withdrawal_fee(amount);
        let required = amount.saturating_add(fee);
        if required > note.amount {
            return Err(ServiceError::InsufficientFunds {
                available: note.amount,
                required,
            });
        }
        let change = Note::generate(note.amount - required);

        Ok(WithdrawalQuote {
            note: note.with_leaf_index(leaf_index),
            change,
            recipient,
            amount,
            fee,
        })
    }

    pub async fn confirm_withdrawal(
        &self,
        quote: WithdrawalQuote,
    ) -> Result<WithdrawalReceipt, ServiceError> {
        let bundle = self
            .builder
            .build_withdrawal(&WithdrawalRequest {
                note: quote.note,
                change: quote.change.clone(),
                recipient: quote.recipient,
                amount: quote.amount,
                fee: quote.fee,
            })
            .await?;

        let confirmation = self.settle_note(&bundle, None, &quote.change).await?;
        info!(
            "Withdrew {} to {} (fee {}), change note at leaf {}",
            quote.amount, quote.recipient, quote.fee, confirmation.leaf_index
        );

        Ok(WithdrawalReceipt {
            change: quote
                .change
                .with_leaf_index(confirmation.leaf_index)
                .with_settlement_id(confirmation.settlement_id.clone()),
            amount: quote.amount,
            fee: quote.fee,
            settlement_id: confirmation.settlement_id,
        })
    }

    pub async fn withdraw(
        &self,
        amount: u64,
        recipient: Address,
        note_text: &str,
    ) -> Result<WithdrawalReceipt, ServiceError> {
        let quote = self.prepare_withdrawal(amount, recipient, note_text)?;
        self.confirm_withdrawal(quote).await
    }

    // =========================================================================
    // Shared
    // =========================================================================

    /// Register the note's intent, settle, then clear the intent unless the
    /// outcome is unknown.
    async fn settle_note(
        &self,
        bundle: &Bundle,
        user_leg: Option<&SignedOperation>,
        note: &Note,
    ) -> Result<Confirmation, ServiceError> {
        let settlement_id = bundle.settlement_id()?.to_hex();
        let intent =
            self.store
                .register_intent(note.commitment(), note.nullifier(), &settlement_id)?;
        let mut guard = IntentGuard::new(&self.store, intent.id);

        let outcome: SettlementOutcome = self.engine.settle(bundle, user_leg).await;
        if !should_clear_intent(&outcome) {
            guard.keep();
        }
        let confirmation = outcome?;

        let record = ConfirmedNote {
            leaf_index: confirmation.leaf_index,
            commitment: note.commitment(),
            nullifier: note.nullifier(),
            settlement_id: confirmation.settlement_id.clone(),
        };
        match self.store.promote(intent.id, &record) {
            Ok(PromoteOutcome::Promoted) | Ok(PromoteOutcome::AlreadyPresent) => guard.keep(),
            // The ledger holds the note regardless; the intent is still cleared
            Err(e) => error!(
                "Settlement {} confirmed at leaf {} but the note was not saved: {e:#}",
                confirmation.settlement_id, confirmation.leaf_index
            ),
        }

        Ok(confirmation)
    }
}
