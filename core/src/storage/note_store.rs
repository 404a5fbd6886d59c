//! Pending Intent Log and confirmed note store.
//!
//! Both live in one RocksDB instance so a promotion (insert the confirmed
//! note, drop the pending row) is a single `WriteBatch`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use shroud_privacy::{Commitment, Nullifier};

use super::{ConfirmedNote, PendingIntent};

const CF_NOTES: &str = "notes";
const CF_NOTES_BY_SETTLEMENT: &str = "notes_by_settlement";
const CF_PENDING: &str = "pending_intents";
const CF_META: &str = "meta";

const KEY_NEXT_INTENT_ID: &[u8] = b"next_intent_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteOutcome {
    Promoted,
    /// The note was already stored; only the pending row was removed
    AlreadyPresent,
}

/// A thread-safe wrapper around the notes database.
#[derive(Clone)]
pub struct NoteStore {
    db: Arc<DB>,
    /// Serializes check-then-write on note keys and id allocation
    write_lock: Arc<Mutex<()>>,
}

impl NoteStore {
    /// Opens the database at the specified path, creating it if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = vec![
            ColumnFamilyDescriptor::new(CF_NOTES, Options::default()),
            ColumnFamilyDescriptor::new(CF_NOTES_BY_SETTLEMENT, Options::default()),
            ColumnFamilyDescriptor::new(CF_PENDING, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, families)
            .map_err(|e| anyhow!("Failed to open notes RocksDB: {}", e))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| anyhow!("note store lock poisoned"))
    }

    // =========================================================================
    // Pending Intents
    // =========================================================================

    pub fn register_intent(
        &self,
        commitment: Commitment,
        nullifier: Nullifier,
        settlement_id: &str,
    ) -> Result<PendingIntent> {
        self.register_intent_at(commitment, nullifier, settlement_id, Utc::now())
    }

    pub fn register_intent_at(
        &self,
        commitment: Commitment,
        nullifier: Nullifier,
        settlement_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<PendingIntent> {
        let pending = self
            .db
            .cf_handle(CF_PENDING)
            .context("pending_intents CF missing")?;
        let meta = self.db.cf_handle(CF_META).context("meta CF missing")?;

        let _guard = self.lock()?;
        let id = match self.db.get_cf(meta, KEY_NEXT_INTENT_ID)? {
            Some(bytes) => decode_u64(&bytes)?,
            None => 1,
        };

        let intent = PendingIntent {
            id,
            commitment,
            nullifier,
            settlement_id: settlement_id.to_string(),
            created_at,
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(pending, id.to_be_bytes(), serde_json::to_vec(&intent)?);
        batch.put_cf(meta, KEY_NEXT_INTENT_ID, (id + 1).to_be_bytes());
        self.db.write(batch)?;

        Ok(intent)
    }

    /// Returns whether a row was removed
    pub fn delete_intent(&self, id: u64) -> Result<bool> {
        let cf = self
            .db
            .cf_handle(CF_PENDING)
            .context("pending_intents CF missing")?;
        let existed = self.db.get_cf(cf, id.to_be_bytes())?.is_some();
        self.db.delete_cf(cf, id.to_be_bytes())?;
        Ok(existed)
    }

    pub fn get_intent(&self, id: u64) -> Result<Option<PendingIntent>> {
        let cf = self
            .db
            .cf_handle(CF_PENDING)
            .context("pending_intents CF missing")?;
        match self.db.get_cf(cf, id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All pending intents, oldest id first
    pub fn list_intents(&self) -> Result<Vec<PendingIntent>> {
        let cf = self
            .db
            .cf_handle(CF_PENDING)
            .context("pending_intents CF missing")?;

        let mut intents = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            intents.push(serde_json::from_slice(&value)?);
        }
        Ok(intents)
    }

    // =========================================================================
    // Confirmed Notes
    // =========================================================================

    /// Store a confirmed note. Returns false if the same note was already
    /// stored; fails if either of its unique keys belongs to another note.
    pub fn save_note(&self, note: &ConfirmedNote) -> Result<bool> {
        let _guard = self.lock()?;
        if self.check_unique(note)? {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        self.put_note(&mut batch, note)?;
        self.db.write(batch)?;
        Ok(true)
    }

    /// Move a pending intent into the confirmed store in one write
    pub fn promote(&self, intent_id: u64, note: &ConfirmedNote) -> Result<PromoteOutcome> {
        let pending = self
            .db
            .cf_handle(CF_PENDING)
            .context("pending_intents CF missing")?;

        let _guard = self.lock()?;
        let already = self.check_unique(note)?;

        let mut batch = WriteBatch::default();
        if !already {
            self.put_note(&mut batch, note)?;
        }
        batch.delete_cf(pending, intent_id.to_be_bytes());
        self.db.write(batch)?;

        Ok(if already {
            PromoteOutcome::AlreadyPresent
        } else {
            PromoteOutcome::Promoted
        })
    }

    pub fn note_at(&self, leaf_index: u64) -> Result<Option<ConfirmedNote>> {
        let cf = self.db.cf_handle(CF_NOTES).context("notes CF missing")?;
        match self.db.get_cf(cf, leaf_index.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn note_by_settlement(&self, settlement_id: &str) -> Result<Option<ConfirmedNote>> {
        let cf = self
            .db
            .cf_handle(CF_NOTES_BY_SETTLEMENT)
            .context("notes_by_settlement CF missing")?;
        match self.db.get_cf(cf, settlement_id.as_bytes())? {
            Some(bytes) => self.note_at(decode_u64(&bytes)?),
            None => Ok(None),
        }
    }

    /// True if this exact note is already stored. Caller holds the lock.
    fn check_unique(&self, note: &ConfirmedNote) -> Result<bool> {
        if let Some(existing) = self.note_at(note.leaf_index)? {
            if existing == *note {
                return Ok(true);
            }
            bail!(
                "leaf index {} already claimed by settlement {}",
                note.leaf_index,
                existing.settlement_id
            );
        }
        if let Some(existing) = self.note_by_settlement(&note.settlement_id)? {
            bail!(
                "settlement {} already recorded at leaf index {}",
                note.settlement_id,
                existing.leaf_index
            );
        }
        Ok(false)
    }

    fn put_note(&self, batch: &mut WriteBatch, note: &ConfirmedNote) -> Result<()> {
        let notes = self.db.cf_handle(CF_NOTES).context("notes CF missing")?;
        let by_settlement = self
            .db
            .cf_handle(CF_NOTES_BY_SETTLEMENT)
            .context("notes_by_settlement CF missing")?;

        batch.put_cf(notes, note.leaf_index.to_be_bytes(), serde_json::to_vec(note)?);
        batch.put_cf(
            by_settlement,
            note.settlement_id.as_bytes(),
            note.leaf_index.to_be_bytes(),
        );
        Ok(())
    }
}

pub(crate) fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| anyhow!("expected 8-byte integer, got {} bytes", bytes.len()))?;
    Ok(u64::from_be_bytes(arr))
}
