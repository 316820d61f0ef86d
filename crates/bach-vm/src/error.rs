//! Error types for the dispatch engine

use crate::backend::{BackendError, BackendKind};
use crate::config::ConfigError;
use bach_primitives::{Address, H256};
use std::fmt;
use thiserror::Error;

/// Errors reported by the ledger collaborator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// State could not be read
    #[error("state read failed: {0}")]
    State(String),

    /// Sender cannot cover the transfer
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount required
        required: u128,
        /// Committed balance
        available: u128,
    },

    /// Transfer has no recipient
    #[error("transfer has no recipient")]
    MissingRecipient,

    /// Ledger refused to commit the outcome
    #[error("commit rejected: {0}")]
    Rejected(String),
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Which layer of the stored contract metadata failed to decode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeStage {
    /// Outer RLP envelope
    Envelope,
    /// Inner JSON record
    Record,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeStage::Envelope => f.write_str("envelope"),
            DecodeStage::Record => f.write_str("record"),
        }
    }
}

fn contract_label(contract: &Option<Address>) -> String {
    match contract {
        Some(addr) => addr.to_hex(),
        None => "<global>".to_string(),
    }
}

/// Contract metadata lookup failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    /// No metadata stored for the contract, or the lookup itself failed
    #[error(
        "can't find contract code in db, contract_addr: {}, len(code): {len}{}",
        contract_label(.contract),
        .reason.as_deref().map(|r| format!(", err: {r}")).unwrap_or_default()
    )]
    NotFound {
        /// Contract address (`None` = global contract)
        contract: Option<Address>,
        /// Length of whatever was read
        len: usize,
        /// Lookup error, if the read failed
        reason: Option<String>,
    },

    /// Metadata exists but cannot be decoded
    #[error(
        "can't decode contract code ({stage}), contract_addr: {}, len(code): {len}, err: {reason}",
        contract_label(.contract)
    )]
    DecodeFailed {
        /// Failing layer
        stage: DecodeStage,
        /// Contract address (`None` = global contract)
        contract: Option<Address>,
        /// Stored blob length
        len: usize,
        /// Decoder message
        reason: String,
    },
}

/// Routing failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// Declared contract type maps to no registered backend
    #[error("can't find backend for contract type {declared:?}, tx_hash: {tx_hash}")]
    UnknownBackend {
        /// Transaction hash
        tx_hash: H256,
        /// Declared contract type
        declared: String,
    },
}

/// Failures while executing a routed job
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Backend reported a failure
    #[error("{backend} backend failed: {source}")]
    Backend {
        /// Backend that ran the job
        backend: BackendKind,
        /// Backend error
        #[source]
        source: BackendError,
    },

    /// Ledger transfer failed
    #[error("transfer failed: {0}")]
    Transfer(#[source] LedgerError),

    /// Execution panicked
    #[error("execution panicked: {0}")]
    Panicked(String),
}

impl ExecutionError {
    /// Whether a second attempt may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            ExecutionError::Backend { source, .. } => source.is_recoverable(),
            ExecutionError::Transfer(_) | ExecutionError::Panicked(_) => false,
        }
    }
}

/// Any failure of one execution attempt
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    /// Classification failed
    #[error(transparent)]
    Classification(#[from] ClassificationError),

    /// Routing failed
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Execution failed
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl VmError {
    /// Whether the redo controller may retry after this error.
    ///
    /// Classification and routing errors are always recoverable; execution
    /// errors are recoverable only when the backend says so.
    pub fn is_recoverable(&self) -> bool {
        match self {
            VmError::Classification(_) | VmError::Routing(_) => true,
            VmError::Execution(e) => e.is_recoverable(),
        }
    }
}

/// Result type for one execution attempt
pub type VmResult<T> = Result<T, VmError>;

/// The ledger's commit step failed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("commit callback failed: {0}")]
pub struct CallbackError(#[from] pub LedgerError);

/// Worker pool errors
#[derive(Debug, Error)]
pub enum PoolError {
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A worker thread could not be spawned
    #[error("failed to spawn worker {worker_id}: {source}")]
    Spawn {
        /// Worker index
        worker_id: usize,
        /// Spawn error
        #[source]
        source: std::io::Error,
    },

    /// Pool has been shut down
    #[error("worker pool is shut down")]
    ShutDown,

    /// A worker thread has exited
    #[error("worker {0} is no longer running")]
    WorkerGone(usize),

    /// Fewer reports than jobs came back
    #[error("batch incomplete: expected {expected} reports, received {received}")]
    Incomplete {
        /// Jobs dispatched
        expected: usize,
        /// Reports received
        received: usize,
    },
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;
