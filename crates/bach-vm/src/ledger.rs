//! Ledger collaborator interface
//!
//! The engine never writes state itself. It reads contract metadata,
//! asks the ledger to apply plain transfers, and reports every job's
//! outcome through [`Ledger::callback`] in sequence order.

use crate::error::{LedgerResult, VmError};
use bach_primitives::{Address, H256};
use bach_types::Transaction;
use bytes::Bytes;

/// Global state key holding the node's built-in contract
pub const GLOBAL_CONTRACT_KEY: &str = "__global_contract__";

/// Per-contract state key holding the contract's metadata
pub const CONTRACT_CODE_KEY: &str = "__contract_code__";

/// Outcome of one job, handed to the ledger in commit order
#[derive(Clone, Debug)]
pub struct CallBackResponse {
    /// Transaction hash
    pub tx_hash: H256,
    /// Position in the batch
    pub sequence_index: usize,
    /// `true` if the ledger may still run its own redo of this transaction,
    /// `false` once the engine has spent its retry.
    pub is_can_redo: bool,
    /// Backend output
    pub result: Option<Bytes>,
    /// Final execution error
    pub err: Option<VmError>,
}

/// State and commit access provided by the ledger.
///
/// Shared by all workers; implementations must be thread-safe.
pub trait Ledger: Send + Sync {
    /// Read a contract-scoped state value
    fn get_state(&self, contract: &Address, key: &str) -> LedgerResult<Option<Vec<u8>>>;

    /// Read a global state value
    fn get_global_state(&self, key: &str) -> LedgerResult<Option<Vec<u8>>>;

    /// Apply a plain value transfer
    fn transfer(&self, tx: &Transaction) -> LedgerResult<()>;

    /// Commit a job's outcome. Called in strictly increasing sequence order.
    fn callback(&self, response: CallBackResponse) -> LedgerResult<()>;
}
