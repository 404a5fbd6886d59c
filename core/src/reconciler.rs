//! Reconciler
//!
//! Periodic sweep over the Pending Intent Log.
//!
//! ```text
//! for each pending intent:
//!   index has settlement id?
//!     no,  age <  staleness  → leave
//!     no,  age >= staleness  → delete (no leaf was ever assigned)
//!     yes, commitment match  → promote (note insert + pending delete, one batch)
//!     yes, mismatch          → alarm, leave for manual inspection
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::storage::{ConfirmedIndex, ConfirmedNote, NoteStore, PendingIntent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub promoted: usize,
    pub expired: usize,
    pub mismatched: usize,
    pub untouched: usize,
    pub errors: usize,
}

impl SweepReport {
    pub fn changed(&self) -> usize {
        self.promoted + self.expired
    }
}

pub struct Reconciler {
    store: NoteStore,
    index: Arc<dyn ConfirmedIndex>,
    staleness: chrono::Duration,
}

impl Reconciler {
    pub fn new(store: NoteStore, index: Arc<dyn ConfirmedIndex>, staleness: chrono::Duration) -> Self {
        Self {
            store,
            index,
            staleness,
        }
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    /// One pass over every pending intent, judged as of `now`
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        if let Err(e) = self.index.refresh() {
            warn!(error = %format!("{e:#}"), "reconciler could not refresh ledger index");
            report.errors += 1;
            return report;
        }

        let intents = match self.store.list_intents() {
            Ok(intents) => intents,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "reconciler could not list pending intents");
                report.errors += 1;
                return report;
            }
        };

        for intent in intents {
            self.reconcile_one(&intent, now, &mut report);
        }

        if report.changed() > 0 || report.mismatched > 0 || report.errors > 0 {
            info!(
                promoted = report.promoted,
                expired = report.expired,
                mismatched = report.mismatched,
                untouched = report.untouched,
                errors = report.errors,
                "reconciler sweep finished"
            );
        }
        report
    }

    fn reconcile_one(&self, intent: &PendingIntent, now: DateTime<Utc>, report: &mut SweepReport) {
        let confirmed = match self.index.confirmed_by_settlement_id(&intent.settlement_id) {
            Ok(found) => found,
            Err(e) => {
                warn!(intent = intent.id, error = %format!("{e:#}"), "index lookup failed");
                report.errors += 1;
                return;
            }
        };

        let Some(txn) = confirmed else {
            if intent.age(now) >= self.staleness {
                match self.store.delete_intent(intent.id) {
                    Ok(_) => {
                        info!(
                            intent = intent.id,
                            settlement = %intent.settlement_id,
                            "expired stale pending intent"
                        );
                        report.expired += 1;
                    }
                    Err(e) => {
                        warn!(intent = intent.id, error = %format!("{e:#}"), "delete failed");
                        report.errors += 1;
                    }
                }
            } else {
                debug!(intent = intent.id, "pending intent not yet confirmed");
                report.untouched += 1;
            }
            return;
        };

        if txn.commitment != intent.commitment {
            error!(
                intent = intent.id,
                settlement = %intent.settlement_id,
                pending = %intent.commitment,
                confirmed = %txn.commitment,
                "commitment mismatch between pending intent and ledger; leaving row for inspection"
            );
            report.mismatched += 1;
            return;
        }

        let note = ConfirmedNote {
            leaf_index: txn.leaf_index,
            commitment: intent.commitment,
            nullifier: intent.nullifier,
            settlement_id: intent.settlement_id.clone(),
        };
        match self.store.promote(intent.id, &note) {
            Ok(outcome) => {
                info!(
                    intent = intent.id,
                    leaf_index = txn.leaf_index,
                    ?outcome,
                    "promoted pending intent"
                );
                report.promoted += 1;
            }
            Err(e) => {
                error!(intent = intent.id, error = %format!("{e:#}"), "promotion failed");
                report.errors += 1;
            }
        }
    }

    /// Sweep every `interval` until `shutdown` fires
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("reconciler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let this = self.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || this.sweep()).await {
                        error!(error = %e, "reconciler sweep panicked");
                    }
                }
            }
        }
    }
}
