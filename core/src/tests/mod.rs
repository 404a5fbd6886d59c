//! Multi-component scenarios against the in-process ledger.


use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use shroud_privacy::{Commitment, Note};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::accumulator::Accumulator;
use crate::bundle::{GroupBuilder, SignedOperation};
use crate::indexer::Indexer;
use crate::ledger::{Address, MockLedger};
use crate::params::ProtocolParams;
use crate::reconciler::Reconciler;
use crate::service::{PoolService, PreparedDeposit, ServiceError};
use crate::session::SessionCache;
use crate::settlement::{MockProver, ProtocolKeys, SettlementEngine};
use crate::storage::{LedgerIndex, NoteStore};

const APP_ID: u64 = 1001;
const FUNDING: u64 = 1_000_000_000_000;

/// Everything the core wires together, on temp storage and a mock ledger
pub(crate) struct Harness {
    _notes_dir: TempDir,
    _index_dir: TempDir,
    pub params: ProtocolParams,
    pub ledger: Arc<MockLedger>,
    pub index: Arc<LedgerIndex>,
    pub store: NoteStore,
    pub keys: Arc<ProtocolKeys>,
    pub indexer: Indexer,
    pub service: PoolService,
    pub shutdown: CancellationToken,
    pub payer_key: SigningKey,
    pub payer: Address,
}

pub(crate) fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub(crate) fn address_of(key: &SigningKey) -> Address {
    Address::from_verifying_key(&key.verifying_key())
}

impl Harness {
    /// A ledger with `seeded` prior deposits, none of them indexed yet
    pub fn new(seeded: usize) -> Self {
        Self::with_session_ttl(seeded, Duration::from_secs(600))
    }

    pub fn with_session_ttl(seeded: usize, ttl: Duration) -> Self {
        let notes_dir = TempDir::new().unwrap();
        let index_dir = TempDir::new().unwrap();

        let params = ProtocolParams::for_app(APP_ID);
        let ledger = Arc::new(MockLedger::new(params.clone()));
        let seeds: Vec<_> = (0..seeded)
            .map(|i| Commitment([(i % 251) as u8 + 1; 32]))
            .collect();
        ledger.seed_leaves(&seeds).unwrap();

        let keys = Arc::new(ProtocolKeys::generate());
        let payer_key = signing_key(200);
        let payer = address_of(&payer_key);
        ledger.fund(payer, FUNDING);
        ledger.fund(keys.accounts().tss, FUNDING);

        let index = Arc::new(LedgerIndex::open(index_dir.path()).unwrap());
        let store = NoteStore::open(notes_dir.path()).unwrap();
        let shutdown = CancellationToken::new();

        let indexer = Indexer::new(ledger.clone(), index.clone(), Duration::from_millis(10));
        let service = PoolService::new(
            params.clone(),
            Self::builder_for(&ledger, &index, &keys, &params),
            SettlementEngine::new(
                ledger.clone(),
                keys.clone(),
                params.wait_rounds,
                shutdown.clone(),
            ),
            store.clone(),
            index.clone(),
            Arc::new(SessionCache::new(ttl)),
        );

        Self {
            _notes_dir: notes_dir,
            _index_dir: index_dir,
            params,
            ledger,
            index,
            store,
            keys,
            indexer,
            service,
            shutdown,
            payer_key,
            payer,
        }
    }

    fn builder_for(
        ledger: &Arc<MockLedger>,
        index: &Arc<LedgerIndex>,
        keys: &ProtocolKeys,
        params: &ProtocolParams,
    ) -> GroupBuilder {
        GroupBuilder::new(
            ledger.clone(),
            Arc::new(MockProver),
            Accumulator::new(index.clone()),
            keys.accounts(),
            params.clone(),
        )
    }

    /// A second builder over the same ledger and index, for inspecting bundles
    pub fn builder(&self) -> GroupBuilder {
        Self::builder_for(&self.ledger, &self.index, &self.keys, &self.params)
    }

    pub fn accumulator(&self) -> Accumulator {
        Accumulator::new(self.index.clone())
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.store.clone(),
            self.index.clone(),
            chrono::Duration::days(7),
        )
    }

    pub fn sign_payment(&self, prepared: &PreparedDeposit) -> SignedOperation {
        SignedOperation::sign(prepared.payment.clone(), &self.payer_key).unwrap()
    }

    /// Prepare, sign and confirm a deposit from the funded payer
    pub async fn deposit(&self, amount: u64) -> Result<Note, ServiceError> {
        let prepared = self.service.prepare_deposit(amount, self.payer).await?;
        let signed = self.sign_payment(&prepared);
        self.service
            .confirm_deposit(&prepared.group_id, &signed, &prepared.note.text())
            .await
    }

    pub async fn index_all(&self) -> usize {
        self.indexer.poll_once().await.unwrap()
    }
}
