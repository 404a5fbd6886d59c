//! Shroud settlement core
//!
//! Opens the note store and the ledger index, wires the pool service, and
//! runs the maintenance loops (reconciler, session sweeper) until Ctrl-C.
//!
//! In dev mode the ledger is an in-process mock with its own indexer, keys
//! are generated at startup, and one deposit is settled as a smoke check.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ed25519_dalek::SigningKey;
use log::{error, info, warn};
use rand::RngCore;
use shroud_config::{ProverMode, ShroudConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use shroud_core::accumulator::Accumulator;
use shroud_core::bundle::{GroupBuilder, SignedOperation};
use shroud_core::indexer::Indexer;
use shroud_core::ledger::{Address, HttpLedgerClient, LedgerClient, MockLedger};
use shroud_core::params::ProtocolParams;
use shroud_core::reconciler::Reconciler;
use shroud_core::service::{PoolService, format_amount, parse_amount};
use shroud_core::session::SessionCache;
use shroud_core::settlement::{MockProver, ProtocolKeys, Prover, RemoteProver, SettlementEngine};
use shroud_core::storage::{ConfirmedIndex, LedgerIndex, LedgerIndexReader, NoteStore};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = ShroudConfig::load()?;
    let params = ProtocolParams::from_config(&config.protocol)?;
    let dev_mode = config.features.dev_mode;

    info!("============================================");
    info!("          SHROUD CORE v{}", env!("CARGO_PKG_VERSION"));
    info!("============================================");
    info!("Notes DB          : {}", config.database.notes_path);
    info!("Index DB          : {}", config.database.index_path);
    info!("Ledger            : {}", if dev_mode { "in-process mock" } else { config.ledger.url.as_str() });
    info!("Application       : {} ({})", params.app_id, params.app_address);
    info!("Prover            : {:?}", config.prover.mode);
    info!("Wait rounds       : {}", params.wait_rounds);
    info!("Reconcile every   : {}s", config.maintenance.reconcile_interval_secs);
    info!("Session TTL       : {}s", config.maintenance.session_ttl_secs);
    info!("============================================");

    let shutdown = CancellationToken::new();

    // The mock ledger starts empty on every run, so dev-mode stores do too
    let (notes_path, index_path) = if dev_mode {
        let notes = format!("{}-dev", config.database.notes_path);
        let index = format!("{}-dev", config.database.index_path);
        for path in [&notes, &index] {
            if std::path::Path::new(path).exists() {
                std::fs::remove_dir_all(path)
                    .with_context(|| format!("Failed to reset dev store {}", path))?;
            }
        }
        (notes, index)
    } else {
        (
            config.database.notes_path.clone(),
            config.database.index_path.clone(),
        )
    };

    let store = NoteStore::open(&notes_path)?;
    info!("Note store opened at {}", notes_path);

    let keys = Arc::new(if dev_mode {
        warn!("Dev mode: generating throwaway protocol keys");
        ProtocolKeys::generate()
    } else {
        ProtocolKeys::load(&config.keys)?
    });

    // Ledger and index. The mock ledger is in-process, so its indexer is too.
    let mock_ledger = dev_mode.then(|| Arc::new(MockLedger::new(params.clone())));
    let (ledger, index): (Arc<dyn LedgerClient>, Arc<dyn ConfirmedIndex>) = match &mock_ledger {
        Some(mock) => {
            let index = Arc::new(LedgerIndex::open(&index_path)?);
            let indexer = Indexer::new(
                mock.clone(),
                index.clone(),
                Duration::from_millis(config.maintenance.indexer_poll_ms),
            );
            let token = shutdown.clone();
            tokio::spawn(async move { indexer.run(token).await });
            let ledger: Arc<dyn LedgerClient> = mock.clone();
            let index: Arc<dyn ConfirmedIndex> = index;
            (ledger, index)
        }
        None => {
            let index = LedgerIndexReader::open(
                index_path.as_str(),
                config.database.index_secondary_path.as_str(),
            )?;
            let ledger: Arc<dyn LedgerClient> = Arc::new(HttpLedgerClient::new(&config.ledger)?);
            let index: Arc<dyn ConfirmedIndex> = Arc::new(index);
            (ledger, index)
        }
    };

    let prover: Arc<dyn Prover> = match config.prover.mode {
        ProverMode::Mock => Arc::new(MockProver),
        ProverMode::Remote => Arc::new(RemoteProver::new(&config.prover)?),
    };

    let sessions = Arc::new(SessionCache::new(Duration::from_secs(
        config.maintenance.session_ttl_secs,
    )));
    let service = PoolService::new(
        params.clone(),
        GroupBuilder::new(
            ledger.clone(),
            prover,
            Accumulator::new(index.clone()),
            keys.accounts(),
            params.clone(),
        ),
        SettlementEngine::new(ledger, keys.clone(), params.wait_rounds, shutdown.clone()),
        store.clone(),
        index.clone(),
        sessions.clone(),
    );

    // Maintenance loops
    let reconciler = Arc::new(Reconciler::new(
        store,
        index,
        chrono::Duration::days(config.maintenance.staleness_days),
    ));
    let reconcile_handle = tokio::spawn(reconciler.run(
        Duration::from_secs(config.maintenance.reconcile_interval_secs),
        shutdown.clone(),
    ));
    info!("Reconciler started");

    let sweep_interval = Duration::from_secs(config.maintenance.session_sweep_secs);
    let sweep_token = shutdown.clone();
    let sweep_handle =
        tokio::spawn(async move { sessions.run_sweeper(sweep_interval, sweep_token).await });
    info!("Session sweeper started");

    if let Some(mock) = &mock_ledger {
        let amount = match config.features.dev_deposit.as_deref() {
            Some(text) => parse_amount(text)
                .with_context(|| format!("Invalid dev deposit amount {:?}", text))?,
            None => params.deposit_minimum,
        };
        if let Err(e) = smoke_deposit(&service, mock, &keys, amount).await {
            error!("Dev-mode deposit failed: {e:#}");
        }
    }

    info!("============================================");
    info!("  Shroud core is ready");
    info!("============================================");

    signal::ctrl_c().await?;
    info!("Shutdown signal received");
    shutdown.cancel();

    if let Err(e) = reconcile_handle.await {
        error!("Reconciler task failed: {}", e);
    }
    if let Err(e) = sweep_handle.await {
        error!("Session sweeper task failed: {}", e);
    }

    info!("Shroud core stopped");
    Ok(())
}

/// Fund a throwaway payer on the mock ledger and settle one deposit
async fn smoke_deposit(
    service: &PoolService,
    ledger: &MockLedger,
    keys: &ProtocolKeys,
    amount: u64,
) -> Result<()> {
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    let payer_key = SigningKey::from_bytes(&seed);
    let payer = Address::from_verifying_key(&payer_key.verifying_key());

    ledger.fund(payer, amount.saturating_mul(2));
    ledger.fund(keys.accounts().tss, amount);

    let prepared = service
        .prepare_deposit(amount, payer)
        .await
        .context("prepare deposit")?;
    let signed = SignedOperation::sign(prepared.payment.clone(), &payer_key)?;
    let note = service
        .confirm_deposit(&prepared.group_id, &signed, &prepared.note.text())
        .await
        .context("confirm deposit")?;

    info!(
        "Dev-mode deposit of {} settled at leaf {:?}",
        format_amount(note.amount),
        note.leaf_index
    );
    Ok(())
}
