//! Ledger indexer: sole writer of the Confirmed Ledger Index.
//!
//! Polls the ledger for confirmed pool calls after the stored watermark,
//! decodes each into a `ConfirmedTxn` and appends it with the root the
//! contract logged. Appends are dense; a gap stops the pass so the next poll
//! retries from the same watermark.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use log::{error, info, warn};
use shroud_privacy::{Commitment, Nullifier};
use tokio_util::sync::CancellationToken;

use crate::bundle::abi::{self, DEPOSIT_METHOD, WITHDRAW_METHOD};
use crate::ledger::{Address, LedgerClient, ProtocolEvent};
use crate::storage::{AppendOutcome, ConfirmedTxn, LedgerIndex, TxnKind};

const RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct Indexer {
    ledger: Arc<dyn LedgerClient>,
    index: Arc<LedgerIndex>,
    poll_interval: Duration,
}

impl Indexer {
    pub fn new(ledger: Arc<dyn LedgerClient>, index: Arc<LedgerIndex>, poll_interval: Duration) -> Self {
        Self {
            ledger,
            index,
            poll_interval,
        }
    }

    /// Index everything confirmed since the watermark. Returns the number of
    /// newly appended leaves.
    pub async fn poll_once(&self) -> Result<usize> {
        let after = self.index.last_round()?;
        let mut events = self.ledger.protocol_events(after).await?;
        events.sort_by_key(|e| e.round);

        let mut appended = 0;
        for event in &events {
            let Some((txn, root)) = parse_event(event)? else {
                continue;
            };
            match self.index.append(&txn, root, event.round)? {
                AppendOutcome::Appended => {
                    info!(
                        "Indexed {:?} leaf {} (settlement {})",
                        txn.kind, txn.leaf_index, txn.settlement_id
                    );
                    appended += 1;
                }
                AppendOutcome::AlreadyIndexed => {}
            }
        }

        if let Some(last) = events.last() {
            self.index.set_last_round(last.round)?;
        }
        Ok(appended)
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Indexer started (poll every {:?})", self.poll_interval);
        loop {
            let delay = match self.poll_once().await {
                Ok(_) => self.poll_interval,
                Err(e) => {
                    error!("Indexer pass failed: {e:#}. Retrying in {:?}", RETRY_DELAY);
                    RETRY_DELAY
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Indexer stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Decode a pool call. Calls to other methods yield `None`.
pub fn parse_event(event: &ProtocolEvent) -> Result<Option<(ConfirmedTxn, [u8; 32])>> {
    let Some(selector) = event.args.first() else {
        warn!("Skipping call without arguments in round {}", event.round);
        return Ok(None);
    };

    let kind = if *selector == abi::method_selector(DEPOSIT_METHOD) {
        TxnKind::Deposit
    } else if *selector == abi::method_selector(WITHDRAW_METHOD) {
        TxnKind::Withdrawal
    } else {
        return Ok(None);
    };

    let log = event
        .logs
        .last()
        .with_context(|| format!("settlement {} has no return log", event.settlement_id))?;
    let (leaf_index, root) = abi::decode_return(log)?;

    let inputs_arg = event
        .args
        .get(2)
        .ok_or_else(|| anyhow!("settlement {} missing public inputs", event.settlement_id))?;
    let inputs = abi::decode_byte32_array(inputs_arg)?;

    let txn = match kind {
        TxnKind::Deposit => {
            let [amount, commitment] = inputs.as_slice() else {
                bail!("deposit {} has {} public inputs", event.settlement_id, inputs.len());
            };
            let payer = event
                .args
                .get(3)
                .and_then(|a| <[u8; 32]>::try_from(a.as_slice()).ok())
                .map(Address)
                .ok_or_else(|| anyhow!("deposit {} missing payer", event.settlement_id))?;
            ConfirmedTxn {
                leaf_index,
                commitment: Commitment(*commitment),
                settlement_id: event.settlement_id.clone(),
                kind,
                address: payer.to_string(),
                amount: block_u64(amount),
                from_nullifier: None,
            }
        }
        TxnKind::Withdrawal => {
            let [_, amount, _fee, commitment, nullifier, _root] = inputs.as_slice() else {
                bail!("withdrawal {} has {} public inputs", event.settlement_id, inputs.len());
            };
            let recipient = event
                .accounts
                .get(1)
                .ok_or_else(|| anyhow!("withdrawal {} missing recipient", event.settlement_id))?;
            ConfirmedTxn {
                leaf_index,
                commitment: Commitment(*commitment),
                settlement_id: event.settlement_id.clone(),
                kind,
                address: recipient.to_string(),
                amount: block_u64(amount),
                from_nullifier: Some(Nullifier(*nullifier)),
            }
        }
    };

    Ok(Some((txn, root)))
}

fn block_u64(block: &[u8; 32]) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&block[24..]);
    u64::from_be_bytes(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MockLedger;
    use crate::params::ProtocolParams;
    use crate::storage::ConfirmedIndex;
    use shroud_privacy::MerkleHasher;
    use tempfile::TempDir;

    fn setup(seeded: u8) -> (TempDir, Arc<MockLedger>, Indexer, Arc<LedgerIndex>) {
        let dir = TempDir::new().unwrap();
        let index = Arc::new(LedgerIndex::open(dir.path()).unwrap());
        let ledger = Arc::new(MockLedger::with_hasher(
            ProtocolParams::for_app(5),
            MerkleHasher::with_depth(6),
        ));
        let seeds: Vec<_> = (0..seeded).map(|i| Commitment([i + 1; 32])).collect();
        ledger.seed_leaves(&seeds).unwrap();
        let indexer = Indexer::new(ledger.clone(), index.clone(), Duration::from_millis(10));
        (dir, ledger, indexer, index)
    }

    #[tokio::test]
    async fn test_poll_indexes_all_events() {
        let (_dir, ledger, indexer, index) = setup(3);
        assert_eq!(indexer.poll_once().await.unwrap(), 3);

        let root = index.current_root().unwrap().unwrap();
        assert_eq!(root.leaf_count, 3);
        assert_eq!(root.root, ledger.current_root());
        assert_eq!(
            index.leaf_index_by_commitment(&Commitment([2; 32])).unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_repoll_is_idempotent() {
        let (_dir, ledger, indexer, index) = setup(2);
        indexer.poll_once().await.unwrap();
        assert_eq!(indexer.poll_once().await.unwrap(), 0);

        ledger.seed_leaves(&[Commitment([9; 32])]).unwrap();
        assert_eq!(indexer.poll_once().await.unwrap(), 1);
        assert_eq!(index.stats().unwrap().deposits, 3);
    }

    #[test]
    fn test_unknown_method_skipped() {
        let event = ProtocolEvent {
            round: 1,
            settlement_id: "x".into(),
            sender: Address([0; 32]),
            args: vec![abi::method_selector(abi::NOOP_METHOD).to_vec()],
            accounts: vec![],
            logs: vec![],
        };
        assert!(parse_event(&event).unwrap().is_none());
    }

    #[test]
    fn test_deposit_with_bad_log_fails() {
        let event = ProtocolEvent {
            round: 1,
            settlement_id: "x".into(),
            sender: Address([0; 32]),
            args: vec![abi::method_selector(DEPOSIT_METHOD).to_vec()],
            accounts: vec![],
            logs: vec![vec![0; 10]],
        };
        assert!(parse_event(&event).is_err());
    }
}
