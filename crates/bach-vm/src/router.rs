//! Backend router
//!
//! Sends a classified job to the ledger (transfers) or to the backend
//! registered for its kind. Errors are logged by the worker, which knows
//! the job's redo state.

use crate::backend::{BackendKind, VmBackend};
use crate::classifier::Classification;
use crate::error::{ExecutionError, RoutingError, VmError, VmResult};
use crate::job::Job;
use crate::ledger::Ledger;
use bytes::Bytes;
use std::collections::HashMap;

/// Backend table owned by one worker
#[derive(Default)]
pub struct BackendRouter {
    backends: HashMap<BackendKind, Box<dyn VmBackend>>,
}

impl BackendRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router from a set of backends
    pub fn with_backends(backends: Vec<Box<dyn VmBackend>>) -> Self {
        let mut router = Self::new();
        for backend in backends {
            router.register(backend);
        }
        router
    }

    /// Register a backend under its own kind, replacing any previous one
    pub fn register(&mut self, backend: Box<dyn VmBackend>) {
        let kind = backend.kind();
        if self.backends.insert(kind, backend).is_some() {
            tracing::warn!(backend = %kind, "Replacing registered backend");
        }
    }

    /// Whether a backend is registered for `kind`
    pub fn has_backend(&self, kind: BackendKind) -> bool {
        self.backends.contains_key(&kind)
    }

    /// Registered backend kinds
    pub fn kinds(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<_> = self.backends.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Execute a classified job
    pub fn route(
        &mut self,
        job: &Job,
        classification: Classification,
        ledger: &dyn Ledger,
    ) -> VmResult<Option<Bytes>> {
        match classification {
            Classification::Transfer => {
                ledger
                    .transfer(job.transaction())
                    .map_err(ExecutionError::Transfer)?;
                Ok(None)
            }
            Classification::Backend(kind) => match self.backends.get_mut(&kind) {
                Some(backend) => backend.execute_job(job, ledger).map_err(|source| {
                    VmError::from(ExecutionError::Backend {
                        backend: kind,
                        source,
                    })
                }),
                None => Err(unknown_backend(job, kind.as_str())),
            },
            Classification::Unrecognized(declared) => Err(unknown_backend(job, &declared)),
        }
    }
}

fn unknown_backend(job: &Job, declared: &str) -> VmError {
    RoutingError::UnknownBackend {
        tx_hash: job.tx_hash(),
        declared: declared.to_string(),
    }
    .into()
}
