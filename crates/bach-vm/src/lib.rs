//! # bach-vm
//!
//! Parallel contract execution with ordered commit for BachLedger.
//!
//! Transactions of a batch run concurrently on a fixed pool of workers but
//! their outcomes reach the ledger strictly in batch order ("parallel
//! execute, serial commit").
//!
//! This crate provides:
//! - [`ContractClassifier`] - decides transfer vs. contract backend per job
//! - [`BackendRouter`] - dispatches classified jobs to the ledger or a [`VmBackend`]
//! - [`RedoController`] - the single bounded retry of a failed job
//! - [`OrderingBarrier`] - per-slot gates that serialize commits
//! - [`VmWorker`] / [`WorkerPool`] - job execution and batch dispatch
//! - [`MemoryLedger`] - an in-memory [`Ledger`] for tests and tooling
//!
//! ## Example
//!
//! ```ignore
//! use bach_vm::{MemoryLedger, VmConfig, WorkerPool};
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(MemoryLedger::new());
//! let pool = WorkerPool::new(VmConfig::with_workers(4), ledger.clone(), &my_backends)?;
//! let report = pool.execute_batch(transactions)?;
//! assert_eq!(ledger.commit_order(), (0..report.len()).collect::<Vec<_>>());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod barrier;
pub mod classifier;
pub mod config;
pub mod error;
pub mod job;
pub mod ledger;
pub mod memory;
pub mod pool;
pub mod redo;
pub mod router;
pub mod stats;
pub mod worker;

pub use backend::{BackendError, BackendFactory, BackendKind, UnknownBackendName, VmBackend};
pub use barrier::{CommitGuard, OrderingBarrier, OrderingGate};
pub use classifier::{Classification, ContractClassifier};
pub use config::{ConfigError, VmConfig};
pub use error::{
    CallbackError, ClassificationError, DecodeStage, ExecutionError, LedgerError, LedgerResult,
    PoolError, PoolResult, RoutingError, VmError, VmResult,
};
pub use job::{ContractContext, ExecutionOutcome, Job, JobTag};
pub use ledger::{CallBackResponse, Ledger, CONTRACT_CODE_KEY, GLOBAL_CONTRACT_KEY};
pub use memory::{CommitRecord, MemoryLedger};
pub use pool::{BatchReport, WorkerPool};
pub use redo::{RedoController, RedoState};
pub use router::BackendRouter;
pub use stats::{PoolStats, StatsSnapshot, WorkerInfo, WorkerSnapshot};
pub use worker::{JobReport, VmWorker};
