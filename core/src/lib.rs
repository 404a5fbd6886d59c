//! Shroud settlement core
//!
//! ```text
//!                ┌──────────────┐     prepare / confirm     ┌────────────────┐
//!   user ───────▶│ PoolService  │──────────────────────────▶│ SessionCache   │
//!                └──────┬───────┘                           └────────────────┘
//!                       │ build                 settle
//!                ┌──────▼───────┐  bundle  ┌──────────────────┐  submit/wait  ┌────────┐
//!                │ GroupBuilder │─────────▶│ SettlementEngine │──────────────▶│ Ledger │
//!                └──────┬───────┘          └──────────────────┘               └───┬────┘
//!                       │ proof_for                                               │ events
//!                ┌──────▼───────┐  read    ┌──────────────────┐   append     ┌─────▼─────┐
//!                │ Accumulator  │─────────▶│ Confirmed Ledger │◀─────────────│  Indexer  │
//!                └──────────────┘          │ Index (secondary)│              └───────────┘
//!                                          └────────▲─────────┘
//!                ┌──────────────┐  promote / expire │
//!                │  NoteStore   │◀───── Reconciler ─┘
//!                └──────────────┘
//! ```

pub mod accumulator;
pub mod bundle;
pub mod indexer;
pub mod ledger;
pub mod params;
pub mod reconciler;
pub mod service;
pub mod session;
pub mod settlement;
pub mod storage;

#[cfg(test)]
mod tests;
