//! Ledger Network Access
//!
//! ```text
//! ┌──────────────────┐        ┌────────────────────────────┐
//! │ GroupBuilder     │──────▶ │  suggested_params          │
//! │ SettlementEngine │──────▶ │  submit_bundle / wait      │
//! │ PoolService      │──────▶ │  account_info              │
//! │ Indexer          │──────▶ │  protocol_events           │
//! └──────────────────┘        └─────────────┬──────────────┘
//!                                           │
//!                       ┌───────────────────┴─────────────┐
//!                       ▼                                 ▼
//!               HttpLedgerClient                     MockLedger
//!               (node REST API)                (in-process, tests/dev)
//! ```
//!
//! Errors cross this seam as free text. The settlement engine classifies them
//! by substring, so implementations must keep the node's wording intact.

pub mod http;
pub mod mock;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use http::HttpLedgerClient;
pub use mock::{MIN_BALANCE, MockLedger};
pub use types::{AccountInfo, Address, ProtocolEvent, Receipt, SuggestedParams};

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current minimum fee and first valid round
    async fn suggested_params(&self) -> Result<SuggestedParams>;

    /// Broadcast a signed bundle
    async fn submit_bundle(&self, signed: &[u8]) -> Result<()>;

    /// Wait up to `max_rounds` rounds for the operation `id` (hex) to confirm
    async fn wait_for_confirmation(&self, id: &str, max_rounds: u64) -> Result<Receipt>;

    async fn account_info(&self, address: &Address) -> Result<AccountInfo>;

    /// Confirmed pool calls in rounds strictly after `after_round`, oldest first
    async fn protocol_events(&self, after_round: u64) -> Result<Vec<ProtocolEvent>>;
}
