//! Contract execution backends
//!
//! A backend is a contract interpreter for one contract family. The engine
//! only needs its identity and a single entry point; everything inside the
//! interpreter is opaque here.

use crate::job::Job;
use crate::ledger::Ledger;
use bach_types::TxKind;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identity of a contract backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    /// Lua contract interpreter
    Lua,
    /// JavaScript contract interpreter
    Js,
}

impl BackendKind {
    /// All known backends
    pub const ALL: [BackendKind; 2] = [BackendKind::Lua, BackendKind::Js];

    /// Name used in stored contract metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Lua => "lua",
            BackendKind::Js => "js",
        }
    }

    /// Backend for a transaction kind that needs no metadata lookup.
    ///
    /// Lua deployments go to Lua; every other contract kind that is not an
    /// invocation (JS deployments and queries) goes to JS.
    pub fn for_direct_kind(kind: TxKind) -> Self {
        match kind {
            TxKind::LuaContractInit => BackendKind::Lua,
            _ => BackendKind::Js,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract type name that matches no backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown backend name {0:?}")]
pub struct UnknownBackendName(pub String);

impl FromStr for BackendKind {
    type Err = UnknownBackendName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lua" => Ok(BackendKind::Lua),
            "js" => Ok(BackendKind::Js),
            other => Err(UnknownBackendName(other.to_string())),
        }
    }
}

/// Failure reported by a backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct BackendError {
    reason: String,
    recoverable: bool,
}

impl BackendError {
    /// A failure that may go away on a second attempt (e.g. a stale read)
    pub fn recoverable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            recoverable: true,
        }
    }

    /// A failure that a retry cannot fix
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            recoverable: false,
        }
    }

    /// Whether the engine may retry
    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    /// Failure description
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// A contract execution backend.
///
/// Each worker owns its own instance of every backend, so implementations
/// need not be `Sync`.
pub trait VmBackend: Send {
    /// Which contract family this backend runs
    fn kind(&self) -> BackendKind;

    /// Execute one job. The job's contract context carries the resolved code
    /// for invocations; deployments carry their code in the transaction
    /// payload.
    fn execute_job(&mut self, job: &Job, ledger: &dyn Ledger) -> Result<Option<Bytes>, BackendError>;
}

/// Builds the backend set for one worker
pub trait BackendFactory: Send + Sync {
    /// Create backends for worker `worker_id`
    fn create(&self, worker_id: usize) -> Vec<Box<dyn VmBackend>>;
}

impl<F> BackendFactory for F
where
    F: Fn(usize) -> Vec<Box<dyn VmBackend>> + Send + Sync,
{
    fn create(&self, worker_id: usize) -> Vec<Box<dyn VmBackend>> {
        self(worker_id)
    }
}
