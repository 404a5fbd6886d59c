//! Confirmed Ledger Index.
//!
//! Written only by the indexer process ([`LedgerIndex`]). The core opens the
//! same files as a RocksDB secondary ([`LedgerIndexReader`]) and catches up
//! with the primary before each read pass.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow, bail};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::{Deserialize, Serialize};
use shroud_privacy::{Commitment, Nullifier};

use super::note_store::decode_u64;
use super::{ConfirmedIndex, ConfirmedTxn, RootRecord, TxnKind};

const CF_LEAVES: &str = "leaves";
const CF_COMMITMENTS: &str = "commitments";
const CF_NULLIFIERS: &str = "nullifiers";
const CF_TXNS: &str = "txns";
const CF_META: &str = "meta";

const COLUMN_FAMILIES: [&str; 5] = [CF_LEAVES, CF_COMMITMENTS, CF_NULLIFIERS, CF_TXNS, CF_META];

const KEY_ROOT: &[u8] = b"root";
const KEY_LAST_ROUND: &[u8] = b"last_round";
const KEY_STATS: &[u8] = b"stats";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    AlreadyIndexed,
}

/// Running totals, updated in the same batch as each append
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub deposits: u64,
    pub withdrawals: u64,
    pub total_deposited: u64,
    pub total_withdrawn: u64,
}

/// Primary (writer) handle
pub struct LedgerIndex {
    db: Arc<DB>,
    append_lock: Mutex<()>,
}

impl LedgerIndex {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, families)
            .map_err(|e| anyhow!("Failed to open index RocksDB: {}", e))?;

        Ok(Self {
            db: Arc::new(db),
            append_lock: Mutex::new(()),
        })
    }

    /// Record a confirmed call and the root the ledger reported after it.
    ///
    /// The leaf index must be exactly the current leaf count. A settlement id
    /// that is already indexed is skipped.
    pub fn append(&self, txn: &ConfirmedTxn, root: [u8; 32], round: u64) -> Result<AppendOutcome> {
        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| anyhow!("index append lock poisoned"))?;

        if read_txn(&self.db, &txn.settlement_id)?.is_some() {
            return Ok(AppendOutcome::AlreadyIndexed);
        }

        let expected = read_root(&self.db)?.map_or(0, |r| r.leaf_count);
        if txn.leaf_index != expected {
            bail!(
                "non-dense leaf index {} for settlement {}: expected {}",
                txn.leaf_index,
                txn.settlement_id,
                expected
            );
        }

        let mut stats = self.stats()?;
        match txn.kind {
            TxnKind::Deposit => {
                stats.deposits += 1;
                stats.total_deposited += txn.amount;
            }
            TxnKind::Withdrawal => {
                stats.withdrawals += 1;
                stats.total_withdrawn += txn.amount;
            }
        }

        let leaves = cf(&self.db, CF_LEAVES)?;
        let commitments = cf(&self.db, CF_COMMITMENTS)?;
        let nullifiers = cf(&self.db, CF_NULLIFIERS)?;
        let txns = cf(&self.db, CF_TXNS)?;
        let meta = cf(&self.db, CF_META)?;

        let record = RootRecord {
            root,
            leaf_count: txn.leaf_index + 1,
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(leaves, txn.leaf_index.to_be_bytes(), txn.commitment.as_bytes());
        batch.put_cf(
            commitments,
            txn.commitment.as_bytes(),
            txn.leaf_index.to_be_bytes(),
        );
        if let Some(nullifier) = &txn.from_nullifier {
            batch.put_cf(nullifiers, nullifier.as_bytes(), txn.settlement_id.as_bytes());
        }
        batch.put_cf(txns, txn.settlement_id.as_bytes(), serde_json::to_vec(txn)?);
        batch.put_cf(meta, KEY_ROOT, serde_json::to_vec(&record)?);
        batch.put_cf(meta, KEY_STATS, serde_json::to_vec(&stats)?);
        batch.put_cf(meta, KEY_LAST_ROUND, round.to_be_bytes());
        self.db.write(batch)?;

        Ok(AppendOutcome::Appended)
    }

    /// Advance the watermark past rounds that held no pool calls
    pub fn set_last_round(&self, round: u64) -> Result<()> {
        let meta = cf(&self.db, CF_META)?;
        if round > self.last_round()? {
            self.db.put_cf(meta, KEY_LAST_ROUND, round.to_be_bytes())?;
        }
        Ok(())
    }

    pub fn last_round(&self) -> Result<u64> {
        let meta = cf(&self.db, CF_META)?;
        match self.db.get_cf(meta, KEY_LAST_ROUND)? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let meta = cf(&self.db, CF_META)?;
        match self.db.get_cf(meta, KEY_STATS)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(IndexStats::default()),
        }
    }
}

impl ConfirmedIndex for LedgerIndex {
    fn all_leaf_commitments(&self) -> Result<Vec<[u8; 32]>> {
        read_leaves(&self.db)
    }

    fn current_root(&self) -> Result<Option<RootRecord>> {
        read_root(&self.db)
    }

    fn leaf_index_by_commitment(&self, commitment: &Commitment) -> Result<Option<u64>> {
        read_leaf_index(&self.db, commitment)
    }

    fn confirmed_by_settlement_id(&self, settlement_id: &str) -> Result<Option<ConfirmedTxn>> {
        read_txn(&self.db, settlement_id)
    }

    fn is_spent(&self, nullifier: &Nullifier) -> Result<bool> {
        read_spent(&self.db, nullifier)
    }
}

/// Read-only secondary handle used by the core
pub struct LedgerIndexReader {
    db: DB,
}

impl LedgerIndexReader {
    /// `secondary_path` holds the secondary's own info log; it must differ
    /// from `primary_path`.
    pub fn open<P: AsRef<Path>>(primary_path: P, secondary_path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.set_max_open_files(-1);

        let db = DB::open_cf_as_secondary(&opts, primary_path, secondary_path, COLUMN_FAMILIES)
            .map_err(|e| anyhow!("Failed to open index as secondary: {}", e))?;

        Ok(Self { db })
    }
}

impl ConfirmedIndex for LedgerIndexReader {
    fn refresh(&self) -> Result<()> {
        self.db
            .try_catch_up_with_primary()
            .map_err(|e| anyhow!("index catch-up failed: {}", e))
    }

    fn all_leaf_commitments(&self) -> Result<Vec<[u8; 32]>> {
        read_leaves(&self.db)
    }

    fn current_root(&self) -> Result<Option<RootRecord>> {
        read_root(&self.db)
    }

    fn leaf_index_by_commitment(&self, commitment: &Commitment) -> Result<Option<u64>> {
        read_leaf_index(&self.db, commitment)
    }

    fn confirmed_by_settlement_id(&self, settlement_id: &str) -> Result<Option<ConfirmedTxn>> {
        read_txn(&self.db, settlement_id)
    }

    fn is_spent(&self, nullifier: &Nullifier) -> Result<bool> {
        read_spent(&self.db, nullifier)
    }
}

// ============================================================================
// Shared reads
// ============================================================================

fn cf<'a>(db: &'a DB, name: &str) -> Result<&'a rocksdb::ColumnFamily> {
    db.cf_handle(name)
        .with_context(|| format!("{name} CF missing"))
}

fn read_leaves(db: &DB) -> Result<Vec<[u8; 32]>> {
    let leaves = cf(db, CF_LEAVES)?;
    let mut out = Vec::new();
    for item in db.iterator_cf(leaves, IteratorMode::Start) {
        let (key, value) = item?;
        let index = decode_u64(&key)?;
        if index != out.len() as u64 {
            bail!("gap in leaf table at index {}", out.len());
        }
        let commitment: [u8; 32] = value
            .as_ref()
            .try_into()
            .map_err(|_| anyhow!("leaf {index} is not 32 bytes"))?;
        out.push(commitment);
    }
    Ok(out)
}

fn read_root(db: &DB) -> Result<Option<RootRecord>> {
    let meta = cf(db, CF_META)?;
    match db.get_cf(meta, KEY_ROOT)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn read_leaf_index(db: &DB, commitment: &Commitment) -> Result<Option<u64>> {
    let commitments = cf(db, CF_COMMITMENTS)?;
    db.get_cf(commitments, commitment.as_bytes())?
        .map(|bytes| decode_u64(&bytes))
        .transpose()
}

fn read_txn(db: &DB, settlement_id: &str) -> Result<Option<ConfirmedTxn>> {
    let txns = cf(db, CF_TXNS)?;
    match db.get_cf(txns, settlement_id.as_bytes())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn read_spent(db: &DB, nullifier: &Nullifier) -> Result<bool> {
    let nullifiers = cf(db, CF_NULLIFIERS)?;
    Ok(db.get_cf(nullifiers, nullifier.as_bytes())?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_index() -> (TempDir, LedgerIndex) {
        let dir = TempDir::new().unwrap();
        let index = LedgerIndex::open(dir.path()).unwrap();
        (dir, index)
    }

    fn deposit(leaf_index: u64, id: &str) -> ConfirmedTxn {
        ConfirmedTxn {
            leaf_index,
            commitment: Commitment([leaf_index as u8 + 1; 32]),
            settlement_id: id.to_string(),
            kind: TxnKind::Deposit,
            address: "payer".into(),
            amount: 2_000_000,
            from_nullifier: None,
        }
    }

    #[test]
    fn test_append_dense() {
        let (_dir, index) = temp_index();
        assert_eq!(
            index.append(&deposit(0, "a"), [1; 32], 5).unwrap(),
            AppendOutcome::Appended
        );
        assert_eq!(
            index.append(&deposit(1, "b"), [2; 32], 6).unwrap(),
            AppendOutcome::Appended
        );

        assert_eq!(
            index.all_leaf_commitments().unwrap(),
            vec![[1u8; 32], [2u8; 32]]
        );
        assert_eq!(
            index.current_root().unwrap(),
            Some(RootRecord {
                root: [2; 32],
                leaf_count: 2
            })
        );
        assert_eq!(
            index.leaf_index_by_commitment(&Commitment([2; 32])).unwrap(),
            Some(1)
        );
        assert_eq!(index.last_round().unwrap(), 6);
        assert_eq!(index.stats().unwrap().total_deposited, 4_000_000);
    }

    #[test]
    fn test_append_rejects_gap() {
        let (_dir, index) = temp_index();
        index.append(&deposit(0, "a"), [1; 32], 1).unwrap();
        assert!(index.append(&deposit(2, "c"), [3; 32], 2).is_err());
        assert_eq!(index.current_root().unwrap().unwrap().leaf_count, 1);
    }

    #[test]
    fn test_append_skips_known_settlement() {
        let (_dir, index) = temp_index();
        index.append(&deposit(0, "a"), [1; 32], 1).unwrap();
        assert_eq!(
            index.append(&deposit(0, "a"), [1; 32], 1).unwrap(),
            AppendOutcome::AlreadyIndexed
        );
        assert_eq!(index.stats().unwrap().deposits, 1);
    }

    #[test]
    fn test_withdrawal_marks_nullifier() {
        let (_dir, index) = temp_index();
        let mut txn = deposit(0, "w");
        txn.kind = TxnKind::Withdrawal;
        txn.from_nullifier = Some(Nullifier([7; 32]));
        index.append(&txn, [1; 32], 1).unwrap();

        assert!(index.is_spent(&Nullifier([7; 32])).unwrap());
        assert!(!index.is_spent(&Nullifier([8; 32])).unwrap());
        assert_eq!(
            index.confirmed_by_settlement_id("w").unwrap(),
            Some(txn.clone())
        );
        assert_eq!(index.stats().unwrap().withdrawals, 1);
    }

    #[test]
    fn test_watermark_only_moves_forward() {
        let (_dir, index) = temp_index();
        index.set_last_round(10).unwrap();
        index.set_last_round(4).unwrap();
        assert_eq!(index.last_round().unwrap(), 10);
    }

    #[test]
    fn test_secondary_reader_catches_up() {
        let primary_dir = TempDir::new().unwrap();
        let secondary_dir = TempDir::new().unwrap();
        let writer = LedgerIndex::open(primary_dir.path()).unwrap();
        writer.append(&deposit(0, "a"), [1; 32], 1).unwrap();

        let reader = LedgerIndexReader::open(primary_dir.path(), secondary_dir.path()).unwrap();
        reader.refresh().unwrap();
        assert_eq!(reader.all_leaf_commitments().unwrap().len(), 1);

        writer.append(&deposit(1, "b"), [2; 32], 2).unwrap();
        reader.refresh().unwrap();
        assert_eq!(reader.current_root().unwrap().unwrap().leaf_count, 2);
        assert!(reader.confirmed_by_settlement_id("b").unwrap().is_some());
    }
}
