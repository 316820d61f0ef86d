//! In-memory ledger
//!
//! Transfers are validated against committed balances and staged per
//! transaction; staged balance changes are applied only when the commit
//! callback for that transaction arrives without an error. The debit is
//! checked again at commit, since transfers from one account may all
//! execute before any of them commits. Every callback is appended to a
//! commit log in arrival order.

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{CallBackResponse, Ledger, CONTRACT_CODE_KEY, GLOBAL_CONTRACT_KEY};
use bach_primitives::{Address, H256};
use bach_types::{encode_contract_state, CodecError, ContractCode, Transaction, TxKind};
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// One entry of the commit log
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRecord {
    /// Position in the batch
    pub sequence_index: usize,
    /// Transaction hash
    pub tx_hash: H256,
    /// Flag reported by the engine
    pub is_can_redo: bool,
    /// Backend output
    pub result: Option<Bytes>,
    /// Rendered execution error
    pub error: Option<String>,
}

/// Balance change staged by a transfer
#[derive(Clone, Copy, Debug)]
struct BalanceDelta {
    debit: Option<(Address, u128)>,
    credit: (Address, u128),
}

/// Thread-safe in-memory [`Ledger`]
#[derive(Default)]
pub struct MemoryLedger {
    state: DashMap<(Address, String), Vec<u8>>,
    global: DashMap<String, Vec<u8>>,
    balances: DashMap<Address, u128>,
    // A hash can occur more than once per batch; each occurrence stages
    // its own delta and each callback consumes one.
    staged: DashMap<H256, Vec<BalanceDelta>>,
    rejected: DashSet<H256>,
    commits: Mutex<Vec<CommitRecord>>,
    state_reads: AtomicU64,
    transfers: AtomicU64,
}

impl MemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Store contract metadata. `None` installs the global contract.
    pub fn deploy_contract(
        &self,
        contract: Option<Address>,
        code: &ContractCode,
    ) -> Result<(), CodecError> {
        let raw = encode_contract_state(code)?;
        self.put_contract_raw(contract, raw);
        Ok(())
    }

    /// Store a raw metadata blob, bypassing the codec
    pub fn put_contract_raw(&self, contract: Option<Address>, raw: Vec<u8>) {
        match contract {
            Some(addr) => {
                self.state.insert((addr, CONTRACT_CODE_KEY.to_string()), raw);
            }
            None => {
                self.global.insert(GLOBAL_CONTRACT_KEY.to_string(), raw);
            }
        }
    }

    /// Remove stored metadata
    pub fn remove_contract(&self, contract: Option<Address>) {
        match contract {
            Some(addr) => {
                self.state.remove(&(addr, CONTRACT_CODE_KEY.to_string()));
            }
            None => {
                self.global.remove(GLOBAL_CONTRACT_KEY);
            }
        }
    }

    /// Set a committed balance
    pub fn set_balance(&self, address: Address, balance: u128) {
        self.balances.insert(address, balance);
    }

    /// Committed balance
    pub fn balance(&self, address: &Address) -> u128 {
        self.balances.get(address).map(|b| *b).unwrap_or(0)
    }

    /// Make the commit callback for `tx_hash` fail
    pub fn reject_commit(&self, tx_hash: H256) {
        self.rejected.insert(tx_hash);
    }

    /// Commit log in arrival order
    pub fn commits(&self) -> Vec<CommitRecord> {
        self.commits.lock().clone()
    }

    /// Sequence indices in commit order
    pub fn commit_order(&self) -> Vec<usize> {
        self.commits.lock().iter().map(|c| c.sequence_index).collect()
    }

    /// Number of state reads served so far
    pub fn state_reads(&self) -> u64 {
        self.state_reads.load(Ordering::Relaxed)
    }

    /// Number of transfer calls served so far
    pub fn transfer_calls(&self) -> u64 {
        self.transfers.load(Ordering::Relaxed)
    }

    /// Clear the commit log and counters, keeping state
    pub fn clear_log(&self) {
        self.commits.lock().clear();
        self.state_reads.store(0, Ordering::Relaxed);
        self.transfers.store(0, Ordering::Relaxed);
    }

    fn unstage(&self, tx_hash: &H256) -> Option<BalanceDelta> {
        let mut entry = self.staged.get_mut(tx_hash)?;
        let delta = entry.pop();
        let drained = entry.is_empty();
        drop(entry);
        if drained {
            self.staged.remove_if(tx_hash, |_, deltas| deltas.is_empty());
        }
        delta
    }

    fn apply(&self, delta: BalanceDelta) -> LedgerResult<()> {
        if let Some((from, amount)) = delta.debit {
            let mut entry = self.balances.entry(from).or_insert(0);
            let available = *entry;
            *entry = available
                .checked_sub(amount)
                .ok_or(LedgerError::InsufficientBalance {
                    required: amount,
                    available,
                })?;
        }
        let (to, amount) = delta.credit;
        let mut entry = self.balances.entry(to).or_insert(0);
        *entry = entry.saturating_add(amount);
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    fn get_state(&self, contract: &Address, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        self.state_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .state
            .get(&(*contract, key.to_string()))
            .map(|v| v.value().clone()))
    }

    fn get_global_state(&self, key: &str) -> LedgerResult<Option<Vec<u8>>> {
        self.state_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.global.get(key).map(|v| v.value().clone()))
    }

    fn transfer(&self, tx: &Transaction) -> LedgerResult<()> {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        let to = tx.to.ok_or(LedgerError::MissingRecipient)?;
        let debit = match tx.kind() {
            TxKind::Issue => None,
            _ => {
                let available = self.balance(&tx.from);
                if available < tx.amount {
                    return Err(LedgerError::InsufficientBalance {
                        required: tx.amount,
                        available,
                    });
                }
                Some((tx.from, tx.amount))
            }
        };
        self.staged.entry(tx.hash()).or_insert_with(Vec::new).push(BalanceDelta {
            debit,
            credit: (to, tx.amount),
        });
        Ok(())
    }

    fn callback(&self, response: CallBackResponse) -> LedgerResult<()> {
        // A failed transfer stages nothing, so only successful outcomes
        // consume a delta.
        let staged = match response.err {
            None => self.unstage(&response.tx_hash),
            Some(_) => None,
        };
        self.commits.lock().push(CommitRecord {
            sequence_index: response.sequence_index,
            tx_hash: response.tx_hash,
            is_can_redo: response.is_can_redo,
            result: response.result,
            error: response.err.as_ref().map(|e| e.to_string()),
        });

        if self.rejected.contains(&response.tx_hash) {
            return Err(LedgerError::Rejected(format!(
                "tx {} refused by ledger",
                response.tx_hash
            )));
        }
        match staged {
            Some(delta) => self.apply(delta),
            None => Ok(()),
        }
    }
}
