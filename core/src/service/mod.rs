//! Pool service
//!
//! ```text
//! deposit:   prepare_deposit ──▶ (payer signs the payment leg) ──▶ confirm_deposit
//!                 │                                                     │
//!                 └── SessionCache[group_id] = bundle + note ───────────┘ take
//!
//! withdraw:  prepare_withdrawal (note lookup, fee, change note) ──▶ confirm_withdrawal
//! ```
//!
//! Both confirm steps register a Pending Intent before submission and clear it
//! afterwards unless the outcome is `TimedOut`.

pub mod amount;
pub mod pool;

use shroud_privacy::NoteError;
use thiserror::Error;

use crate::bundle::BundleError;
use crate::settlement::SettlementFailure;

pub use amount::{AmountError, format_amount, parse_amount};
pub use pool::{DepositSession, PoolService, PreparedDeposit, WithdrawalQuote, WithdrawalReceipt};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("amount {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: u64, minimum: u64 },

    #[error("invalid note: {0}")]
    InvalidNote(#[from] NoteError),

    #[error("note is not in the pool")]
    NoteNotFound,

    #[error("note has already been spent")]
    NoteSpent,

    #[error("insufficient funds: note holds {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("no pending session for group {0}")]
    SessionNotFound(String),

    #[error("note does not match the prepared deposit")]
    NoteMismatch,

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Settlement(#[from] SettlementFailure),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl ServiceError {
    /// User-facing advice, where there is any
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            ServiceError::Settlement(failure) => Some(failure.kind.guidance()),
            ServiceError::SessionNotFound(_) => {
                Some("The deposit expired or was already submitted. Start a new deposit.")
            }
            ServiceError::InsufficientFunds { .. } => {
                Some("Withdraw less; the protocol fee is taken from the note.")
            }
            _ => None,
        }
    }
}
