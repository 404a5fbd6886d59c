pub mod classify;
pub mod engine;
pub mod keys;
pub mod prover;
pub mod remote_prover;

pub use classify::{FailureKind, SettlementFailure, classify_submit_error, classify_wait_error};
pub use engine::{Confirmation, SettlementEngine, SettlementOutcome, should_clear_intent};
pub use keys::ProtocolKeys;
pub use prover::{MockProver, Prover, Witness, ZkArgs};
pub use remote_prover::RemoteProver;
