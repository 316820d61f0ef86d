//! Job and outcome types

use crate::backend::BackendKind;
use crate::error::VmError;
use bach_primitives::{Address, H256};
use bach_types::Transaction;
use bytes::Bytes;
use std::collections::HashMap;

/// Contract data resolved for one job
#[derive(Clone, Debug, Default)]
pub struct ContractContext {
    /// Target contract (`None` = global contract)
    pub contract_addr: Option<Address>,
    /// Contract code, filled in by the classifier for invocations
    pub code: Option<Bytes>,
    /// Backend chosen by the classifier
    pub backend: Option<BackendKind>,
    /// Free-form backend scratch space
    pub scratch: HashMap<String, Bytes>,
}

impl ContractContext {
    /// Context for a transaction, nothing resolved yet
    pub fn for_transaction(tx: &Transaction) -> Self {
        Self {
            contract_addr: tx.contract_address(),
            ..Default::default()
        }
    }

    /// Forget everything resolved by a previous attempt
    pub fn reset(&mut self) {
        self.code = None;
        self.backend = None;
        self.scratch.clear();
    }
}

/// One transaction at a fixed position in its batch
#[derive(Clone, Debug)]
pub struct Job {
    transaction: Transaction,
    tx_hash: H256,
    sequence_index: usize,
    context: ContractContext,
}

impl Job {
    /// Create a job for the transaction at `sequence_index`
    pub fn new(transaction: Transaction, sequence_index: usize) -> Self {
        let tx_hash = transaction.hash();
        let context = ContractContext::for_transaction(&transaction);
        Self {
            transaction,
            tx_hash,
            sequence_index,
            context,
        }
    }

    /// The transaction
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Cached transaction hash
    pub fn tx_hash(&self) -> H256 {
        self.tx_hash
    }

    /// Position in the batch; fixes commit order
    pub fn sequence_index(&self) -> usize {
        self.sequence_index
    }

    /// Resolved contract data
    pub fn context(&self) -> &ContractContext {
        &self.context
    }

    /// Mutable resolved contract data
    pub fn context_mut(&mut self) -> &mut ContractContext {
        &mut self.context
    }

    /// Log identity of this job on the given worker
    pub fn tag(&self, worker_id: usize) -> JobTag {
        JobTag {
            worker_id,
            tx_hash: self.tx_hash,
            tx_idx: self.sequence_index,
        }
    }
}

/// Fields every job log line carries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobTag {
    /// Worker processing the job
    pub worker_id: usize,
    /// Transaction hash
    pub tx_hash: H256,
    /// Sequence index
    pub tx_idx: usize,
}

/// Final result of running a job through the redo controller
#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    /// Backend output, if any
    pub result: Option<Bytes>,
    /// Final error, if the job failed
    pub error: Option<VmError>,
    /// Whether the engine already spent its one retry on this job
    pub can_redo: bool,
}

impl ExecutionOutcome {
    /// Build from the last attempt's result
    pub fn from_attempt(attempt: Result<Option<Bytes>, VmError>, can_redo: bool) -> Self {
        match attempt {
            Ok(result) => Self {
                result,
                error: None,
                can_redo,
            },
            Err(error) => Self {
                result: None,
                error: Some(error),
                can_redo,
            },
        }
    }

    /// Whether the job succeeded
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Value reported to the ledger as `is_can_redo`: true only while the
    /// engine has not retried, i.e. the ledger may still schedule its own redo.
    pub fn ledger_can_redo(&self) -> bool {
        !self.can_redo
    }
}
