//! In-process ledger for tests and dev mode.
//!
//! Checks what the pool contract and the node would check (group integrity,
//! signatures, validity window, balances, proof, spent nullifiers, known
//! roots), maintains the commitment tree, and reports failures with the same
//! wording a real node uses so classification sees realistic text.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use sha2::{Digest, Sha512_256};
use shroud_privacy::{Commitment, MerkleHasher, pad_amount, reduce_to_field};

use super::LedgerClient;
use super::types::{AccountInfo, Address, ProtocolEvent, Receipt, SuggestedParams};
use crate::bundle::abi::{self, DEPOSIT_METHOD, WITHDRAW_METHOD};
use crate::bundle::{GroupId, Operation, OperationKind, SignedBundle};
use crate::params::ProtocolParams;
use crate::settlement::MockProver;

const DEFAULT_MIN_FEE: u64 = 1_000;

/// Smallest balance a non-pool account may be left with
pub const MIN_BALANCE: u64 = 100_000;

struct MockState {
    round: u64,
    min_fee: u64,
    hasher: MerkleHasher,
    leaves: Vec<[u8; 32]>,
    root: [u8; 32],
    known_roots: HashSet<[u8; 32]>,
    spent: HashSet<[u8; 32]>,
    balances: HashMap<Address, u64>,
    receipts: HashMap<String, Receipt>,
    events: Vec<ProtocolEvent>,
    submit_errors: VecDeque<String>,
    wait_errors: VecDeque<String>,
    withhold_receipts: bool,
}

/// Effects of an accepted pool call
struct PoolEffect {
    commitment: [u8; 32],
    nullifier: Option<[u8; 32]>,
    payout: Option<(Address, u64)>,
}

pub struct MockLedger {
    params: ProtocolParams,
    state: Mutex<MockState>,
}

impl MockLedger {
    pub fn new(params: ProtocolParams) -> Self {
        Self::with_hasher(params, MerkleHasher::new())
    }

    pub fn with_hasher(params: ProtocolParams, hasher: MerkleHasher) -> Self {
        let root = *hasher.zero_hash(hasher.depth());
        Self {
            params,
            state: Mutex::new(MockState {
                round: 1,
                min_fee: DEFAULT_MIN_FEE,
                hasher,
                leaves: Vec::new(),
                root,
                known_roots: HashSet::from([root]),
                spent: HashSet::new(),
                balances: HashMap::new(),
                receipts: HashMap::new(),
                events: Vec::new(),
                submit_errors: VecDeque::new(),
                wait_errors: VecDeque::new(),
                withhold_receipts: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Test controls
    // =========================================================================

    pub fn fund(&self, address: Address, amount: u64) {
        *self.state().balances.entry(address).or_default() += amount;
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.state().balances.get(address).copied().unwrap_or(0)
    }

    pub fn advance_rounds(&self, rounds: u64) {
        self.state().round += rounds;
    }

    pub fn round(&self) -> u64 {
        self.state().round
    }

    pub fn set_min_fee(&self, min_fee: u64) {
        self.state().min_fee = min_fee;
    }

    /// The next `submit_bundle` fails with this text
    pub fn fail_next_submit(&self, message: impl Into<String>) {
        self.state().submit_errors.push_back(message.into());
    }

    /// The next `wait_for_confirmation` fails with this text
    pub fn fail_next_wait(&self, message: impl Into<String>) {
        self.state().wait_errors.push_back(message.into());
    }

    /// Apply accepted bundles but never hand out their receipts
    pub fn withhold_receipts(&self, withhold: bool) {
        self.state().withhold_receipts = withhold;
    }

    pub fn current_root(&self) -> [u8; 32] {
        self.state().root
    }

    pub fn leaf_count(&self) -> u64 {
        self.state().leaves.len() as u64
    }

    /// Insert commitments as if earlier deposits had confirmed, one per round
    pub fn seed_leaves(&self, commitments: &[Commitment]) -> Result<()> {
        let mut st = self.state();
        for commitment in commitments {
            let leaf_index = st.leaves.len() as u64;
            let root = append_leaf(&mut st, commitment.0)?;

            let inputs = vec![pad_amount(self.params.deposit_minimum), commitment.0];
            let proof = MockProver::expected_proof("deposit", &inputs);
            let args = vec![
                abi::method_selector(DEPOSIT_METHOD).to_vec(),
                abi::encode_byte32_array(&proof)?,
                abi::encode_byte32_array(&inputs)?,
                vec![0u8; 32],
            ];
            let settlement_id = hex::encode(Sha512_256::digest(leaf_index.to_be_bytes()));

            *st.balances.entry(self.params.app_address).or_default() += self.params.deposit_minimum;
            let round = st.round;
            st.events.push(ProtocolEvent {
                round,
                settlement_id,
                sender: Address([0u8; 32]),
                args,
                accounts: vec![],
                logs: vec![abi::encode_return(leaf_index, &root)],
            });
            st.round += 1;
        }
        Ok(())
    }

    // =========================================================================
    // Pool contract checks
    // =========================================================================

    fn check_deposit(&self, ops: &[&Operation], args: &[Vec<u8>]) -> Result<PoolEffect> {
        let [_, proof, inputs, payer, ..] = args else {
            bail!("logic eval error: deposit expects 4 arguments");
        };
        let inputs = abi::decode_byte32_array(inputs).map_err(|e| anyhow!("logic eval error: {e}"))?;
        let proof = abi::decode_byte32_array(proof).map_err(|e| anyhow!("logic eval error: {e}"))?;
        if inputs.len() != 2 || proof != MockProver::expected_proof("deposit", &inputs) {
            bail!("logic eval error: proof verification failed");
        }

        let amount = block_u64(&inputs[0]);
        if amount < self.params.deposit_minimum {
            bail!("logic eval error: deposit below minimum");
        }

        let payment = ops
            .get(1)
            .ok_or_else(|| anyhow!("logic eval error: deposit without payment"))?;
        let paid = match &payment.kind {
            OperationKind::Payment { receiver, amount: paid } if *receiver == self.params.app_address => *paid,
            _ => bail!("logic eval error: second operation must pay the pool"),
        };
        if paid != amount || payer.as_slice() != payment.sender.as_bytes() {
            bail!("logic eval error: payment does not match deposit");
        }

        Ok(PoolEffect {
            commitment: inputs[1],
            nullifier: None,
            payout: None,
        })
    }

    fn check_withdraw(
        &self,
        st: &MockState,
        args: &[Vec<u8>],
        accounts: &[Address],
        boxes: &[Vec<u8>],
    ) -> Result<PoolEffect> {
        let [_, proof, inputs, ..] = args else {
            bail!("logic eval error: withdraw expects 6 arguments");
        };
        let inputs = abi::decode_byte32_array(inputs).map_err(|e| anyhow!("logic eval error: {e}"))?;
        let proof = abi::decode_byte32_array(proof).map_err(|e| anyhow!("logic eval error: {e}"))?;
        if inputs.len() != 6 || proof != MockProver::expected_proof("withdrawal", &inputs) {
            bail!("logic eval error: proof verification failed");
        }

        let recipient = *accounts
            .get(1)
            .ok_or_else(|| anyhow!("logic eval error: missing recipient account"))?;
        if reduce_to_field(recipient.as_bytes()) != inputs[0] {
            bail!("logic eval error: recipient does not match proof");
        }
        let nullifier = inputs[4];
        if boxes.first().map(Vec::as_slice) != Some(nullifier.as_slice()) {
            bail!("logic eval error: nullifier box not referenced");
        }
        if st.spent.contains(&nullifier) {
            bail!("logic eval error: nullifier already spent");
        }
        if !st.known_roots.contains(&inputs[5]) {
            bail!("logic eval error: unknown root");
        }

        let amount = block_u64(&inputs[1]);
        let pool = st.balances.get(&self.params.app_address).copied().unwrap_or(0);
        if pool < amount {
            bail!("logic eval error: pool balance too low");
        }

        Ok(PoolEffect {
            commitment: inputs[3],
            nullifier: Some(nullifier),
            payout: Some((recipient, amount)),
        })
    }
}

fn block_u64(block: &[u8; 32]) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&block[24..]);
    u64::from_be_bytes(out)
}

fn append_leaf(st: &mut MockState, commitment: [u8; 32]) -> Result<[u8; 32]> {
    st.leaves.push(commitment);
    let root = st.hasher.compute_root(&st.leaves)?;
    st.root = root;
    st.known_roots.insert(root);
    Ok(root)
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn suggested_params(&self) -> Result<SuggestedParams> {
        let st = self.state();
        Ok(SuggestedParams {
            min_fee: st.min_fee,
            first_valid: st.round,
        })
    }

    async fn submit_bundle(&self, signed: &[u8]) -> Result<()> {
        let mut st = self.state();
        if let Some(message) = st.submit_errors.pop_front() {
            bail!("{message}");
        }

        let bundle = SignedBundle::from_bytes(signed).map_err(|e| anyhow!("malformed bundle: {e}"))?;
        let operations: Vec<Operation> = bundle
            .operations
            .iter()
            .map(|s| s.operation.clone())
            .collect();
        let ops: Vec<&Operation> = operations.iter().collect();
        let first = *ops.first().ok_or_else(|| anyhow!("empty bundle"))?;

        // Group integrity
        let group = GroupId::compute(&operations)?;
        if ops.iter().any(|op| op.group != group.0) {
            bail!("transaction group is incomplete or reordered");
        }
        for (i, signed_op) in bundle.operations.iter().enumerate() {
            if !signed_op.verify() {
                bail!("transaction {i}: invalid signature");
            }
        }

        // Validity window
        for op in &ops {
            if st.round < op.first_valid || st.round > op.last_valid {
                bail!(
                    "TransactionPool.Remember: txn dead: round {} outside of {}--{}",
                    st.round,
                    op.first_valid,
                    op.last_valid
                );
            }
        }

        // Fees and payments
        let mut outflow: HashMap<Address, u64> = HashMap::new();
        for op in &ops {
            let paid = match op.kind {
                OperationKind::Payment { amount, .. } => amount,
                OperationKind::ProtocolCall { .. } => 0,
            };
            let total = op
                .fee
                .checked_add(paid)
                .and_then(|spend| outflow.get(&op.sender).copied().unwrap_or(0).checked_add(spend))
                .with_context(|| format!("TransactionPool.Remember: overspend (account {}, amount overflows)", op.sender))?;
            outflow.insert(op.sender, total);
        }
        for (address, spend) in outflow.iter().filter(|(_, spend)| **spend > 0) {
            let balance = st.balances.get(address).copied().unwrap_or(0);
            if balance < *spend {
                bail!("TransactionPool.Remember: overspend (account {address}, balance {balance}, needed {spend})");
            }
            if *address != self.params.app_address && balance - spend < MIN_BALANCE {
                bail!(
                    "account {address} balance {} below min {MIN_BALANCE}",
                    balance - spend
                );
            }
        }

        // Pool contract
        let OperationKind::ProtocolCall {
            app_id,
            args,
            accounts,
            boxes,
        } = &first.kind
        else {
            bail!("logic eval error: first operation is not a pool call");
        };
        if *app_id != self.params.app_id {
            bail!("logic eval error: wrong application {app_id}");
        }
        if ops.len() < self.params.budget_operations {
            bail!("logic eval error: dynamic cost budget exceeded");
        }
        let selector = args.first().map(Vec::as_slice).unwrap_or_default();
        let effect = if selector == abi::method_selector(DEPOSIT_METHOD) {
            self.check_deposit(&ops, args)?
        } else if selector == abi::method_selector(WITHDRAW_METHOD) {
            self.check_withdraw(&st, args, accounts, boxes)?
        } else {
            bail!("logic eval error: unknown method");
        };

        // Apply
        for (address, spend) in &outflow {
            if let Some(balance) = st.balances.get_mut(address) {
                *balance -= spend;
            }
        }
        for op in &ops {
            if let OperationKind::Payment { receiver, amount } = op.kind {
                *st.balances.entry(receiver).or_default() += amount;
            }
        }
        if let Some((recipient, amount)) = effect.payout {
            *st.balances.entry(self.params.app_address).or_default() -= amount;
            *st.balances.entry(recipient).or_default() += amount;
        }
        if let Some(nullifier) = effect.nullifier {
            st.spent.insert(nullifier);
        }

        let leaf_index = st.leaves.len() as u64;
        let root = append_leaf(&mut st, effect.commitment)?;
        st.round += 1;

        let id = first.id()?.to_hex();
        let logs = vec![abi::encode_return(leaf_index, &root)];
        let round = st.round;
        st.events.push(ProtocolEvent {
            round,
            settlement_id: id.clone(),
            sender: first.sender,
            args: args.clone(),
            accounts: accounts.clone(),
            logs: logs.clone(),
        });
        if !st.withhold_receipts {
            st.receipts.insert(
                id.clone(),
                Receipt {
                    id,
                    confirmed_round: round,
                    logs,
                },
            );
        }
        Ok(())
    }

    async fn wait_for_confirmation(&self, id: &str, max_rounds: u64) -> Result<Receipt> {
        let mut st = self.state();
        if let Some(message) = st.wait_errors.pop_front() {
            bail!("{message}");
        }
        match st.receipts.get(id) {
            Some(receipt) => Ok(receipt.clone()),
            None => {
                st.round += max_rounds;
                bail!("Wait for transaction id {id} timed out after {max_rounds} rounds")
            }
        }
    }

    async fn account_info(&self, address: &Address) -> Result<AccountInfo> {
        Ok(AccountInfo {
            balance: self.balance(address),
            min_balance: MIN_BALANCE,
        })
    }

    async fn protocol_events(&self, after_round: u64) -> Result<Vec<ProtocolEvent>> {
        Ok(self
            .state()
            .events
            .iter()
            .filter(|e| e.round > after_round)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seed_leaves_emit_events() {
        let params = ProtocolParams::for_app(3);
        let ledger = MockLedger::with_hasher(params.clone(), MerkleHasher::with_depth(4));
        ledger
            .seed_leaves(&[Commitment([1; 32]), Commitment([2; 32])])
            .unwrap();

        assert_eq!(ledger.leaf_count(), 2);
        let events = ledger.protocol_events(0).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].round < events[1].round);
        let (index, root) = abi::decode_return(&events[1].logs[0]).unwrap();
        assert_eq!(index, 1);
        assert_eq!(root, ledger.current_root());
        assert_eq!(ledger.balance(&params.app_address), 2 * params.deposit_minimum);

        assert_eq!(ledger.protocol_events(events[0].round).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_errors_are_returned_verbatim() {
        let ledger = MockLedger::new(ProtocolParams::for_app(3));
        ledger.fail_next_submit("overspend (account X)");
        let err = ledger.submit_bundle(&[]).await.unwrap_err();
        assert_eq!(err.to_string(), "overspend (account X)");

        let err = ledger.submit_bundle(&[1, 2, 3]).await.unwrap_err();
        assert!(err.to_string().contains("malformed bundle"));
    }

    #[tokio::test]
    async fn test_wait_for_unknown_id_times_out() {
        let ledger = MockLedger::new(ProtocolParams::for_app(3));
        let before = ledger.round();
        let err = ledger.wait_for_confirmation("abcd", 10).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(ledger.round(), before + 10);
    }
}
