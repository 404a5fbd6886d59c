//! Protocol constants
//!
//! Defaults for values the on-chain contract fixes. Changing one here without
//! redeploying the contract produces bundles the verifier rejects.

/// Rounds a bundle stays valid, and how long settlement waits for it
pub const WAIT_ROUNDS: u64 = 10;

/// Top-level operations needed to meet the verifier's compute budget
pub const BUDGET_OPERATIONS: usize = 8;

/// Flat fee on a deposit bundle, in multiples of the ledger's minimum fee
pub const DEPOSIT_FEE_MULTIPLIER: u64 = 42;

/// Flat fee on a withdrawal bundle, in multiples of the ledger's minimum fee
pub const WITHDRAWAL_FEE_MULTIPLIER: u64 = 47;

/// Smallest deposit accepted, in base units
pub const DEPOSIT_MINIMUM: u64 = 1_000_000;

/// Withdrawal protocol fee is amount / divisor (0.1%)...
pub const WITHDRAWAL_FEE_DIVISOR: u64 = 1_000;

/// ...but never less than this, in base units
pub const WITHDRAWAL_MINIMUM_FEE: u64 = 100_000;

/// Age after which an unmatched pending intent is discarded
pub const STALENESS_DAYS: i64 = 7;

/// Decimal places of the ledger's base unit
pub const BASE_UNIT_DECIMALS: u32 = 6;
