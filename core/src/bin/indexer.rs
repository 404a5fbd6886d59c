//! Shroud ledger indexer
//!
//! Sole writer of the Confirmed Ledger Index. The core opens the same
//! database as a secondary and only reads.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::info;
use shroud_config::ShroudConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use shroud_core::indexer::Indexer;
use shroud_core::ledger::HttpLedgerClient;
use shroud_core::storage::LedgerIndex;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = ShroudConfig::load()?;

    info!("============================================");
    info!("        SHROUD INDEXER v{}", env!("CARGO_PKG_VERSION"));
    info!("============================================");
    info!("Index DB          : {}", config.database.index_path);
    info!("Ledger            : {}", config.ledger.url);
    info!("Poll interval     : {}ms", config.maintenance.indexer_poll_ms);
    info!("============================================");

    let index = Arc::new(LedgerIndex::open(&config.database.index_path)?);
    let stats = index.stats()?;
    info!(
        "Index opened: {} deposits, {} withdrawals, last round {}",
        stats.deposits,
        stats.withdrawals,
        index.last_round()?
    );

    let ledger = Arc::new(HttpLedgerClient::new(&config.ledger)?);
    let indexer = Indexer::new(
        ledger,
        index,
        Duration::from_millis(config.maintenance.indexer_poll_ms),
    );

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        token.cancel();
    });

    indexer.run(shutdown).await;
    info!("Shroud indexer stopped");
    Ok(())
}
