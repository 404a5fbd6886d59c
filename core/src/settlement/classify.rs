//! Settlement outcome classification.
//!
//! The ledger reports failures as free text. These tables map that text to a
//! [`FailureKind`]. The pattern lists follow the node's current vocabulary and
//! are not known to be exhaustive; anything unmatched is `InternalError`.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Verifier logic or proof check failed
    Rejected,
    /// A signer cannot cover its fees or payments
    OverSpent,
    /// Validity window lapsed before the bundle was accepted
    Expired,
    /// A participant would drop below the ledger's minimum balance
    BelowMinimumBalance,
    /// Outcome unknown: not seen confirmed within the wait bound
    TimedOut,
    InternalError,
}

impl FailureKind {
    /// What the user should do next
    pub fn guidance(&self) -> &'static str {
        match self {
            FailureKind::Rejected => {
                "The pool contract rejected the transaction. Check the note and amounts; do not retry unchanged."
            }
            FailureKind::OverSpent => {
                "An account in the bundle cannot cover its payment and fees. Fund it and try again."
            }
            FailureKind::Expired => {
                "The transaction expired before the ledger accepted it. Start the operation again."
            }
            FailureKind::BelowMinimumBalance => {
                "The transaction would leave an account below the ledger's minimum balance. Add funds or lower the amount."
            }
            FailureKind::TimedOut => {
                "The transaction was sent but not yet seen confirmed. It may still confirm; keep your note and check again later."
            }
            FailureKind::InternalError => {
                "An unexpected error occurred. Keep your note and try again later."
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Rejected => "rejected",
            FailureKind::OverSpent => "overspent",
            FailureKind::Expired => "expired",
            FailureKind::BelowMinimumBalance => "below minimum balance",
            FailureKind::TimedOut => "timed out",
            FailureKind::InternalError => "internal error",
        };
        f.write_str(name)
    }
}

/// A terminal settlement failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("settlement {kind}: {message}")]
pub struct SettlementFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SettlementFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InternalError, message)
    }
}

/// Classify an error returned by `submit_bundle`
pub fn classify_submit_error(message: &str) -> SettlementFailure {
    let kind = if message.contains("logic eval error") {
        FailureKind::Rejected
    } else if message.contains("overspend") {
        FailureKind::OverSpent
    } else if message.contains("txn dead") {
        FailureKind::Expired
    } else if message.contains("balance") && message.contains("below min") {
        FailureKind::BelowMinimumBalance
    } else {
        FailureKind::InternalError
    };
    SettlementFailure::new(kind, message)
}

/// Classify an error returned by `wait_for_confirmation`
pub fn classify_wait_error(message: &str) -> SettlementFailure {
    let kind = if message.contains("timed out") {
        FailureKind::TimedOut
    } else if message.contains("Transaction rejected") {
        FailureKind::Rejected
    } else {
        FailureKind::InternalError
    };
    SettlementFailure::new(kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_table() {
        let cases = [
            (
                "TransactionPool.Remember: transaction ABC: logic eval error: assert failed pc=812",
                FailureKind::Rejected,
            ),
            (
                "TransactionPool.Remember: transaction XYZ: overspend (account QQ, data {_struct:{} Status:Offline})",
                FailureKind::OverSpent,
            ),
            (
                "TransactionPool.Remember: txn dead: round 1200 outside of 1000--1010",
                FailureKind::Expired,
            ),
            (
                "account ZZ balance 90000 below min 100000 (0 assets)",
                FailureKind::BelowMinimumBalance,
            ),
            ("connection reset by peer", FailureKind::InternalError),
            ("", FailureKind::InternalError),
        ];
        for (message, expected) in cases {
            let failure = classify_submit_error(message);
            assert_eq!(failure.kind, expected, "{message}");
            assert_eq!(failure.message, message);
        }
    }

    #[test]
    fn test_balance_needs_both_words() {
        assert_eq!(
            classify_submit_error("balance too low").kind,
            FailureKind::InternalError
        );
        assert_eq!(
            classify_submit_error("value below min").kind,
            FailureKind::InternalError
        );
    }

    #[test]
    fn test_submit_matching_is_case_sensitive() {
        assert_eq!(
            classify_submit_error("LOGIC EVAL ERROR").kind,
            FailureKind::InternalError
        );
    }

    #[test]
    fn test_wait_table() {
        assert_eq!(
            classify_wait_error("Wait for transaction id X timed out after 10 rounds").kind,
            FailureKind::TimedOut
        );
        assert_eq!(
            classify_wait_error("Transaction rejected: logic eval error").kind,
            FailureKind::Rejected
        );
        assert_eq!(
            classify_wait_error("500 Internal Server Error").kind,
            FailureKind::InternalError
        );
    }

    #[test]
    fn test_every_kind_has_guidance() {
        for kind in [
            FailureKind::Rejected,
            FailureKind::OverSpent,
            FailureKind::Expired,
            FailureKind::BelowMinimumBalance,
            FailureKind::TimedOut,
            FailureKind::InternalError,
        ] {
            assert!(!kind.guidance().is_empty());
        }
    }
}
