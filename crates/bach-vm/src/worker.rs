//! VM worker
//!
//! Runs one job at a time: classify, route and execute under the redo
//! controller, then wait for the job's commit turn and hand the outcome to
//! the ledger.

use crate::barrier::OrderingBarrier;
use crate::classifier::ContractClassifier;
use crate::error::{CallbackError, ExecutionError, LedgerError, RoutingError, VmError, VmResult};
use crate::job::{ExecutionOutcome, Job};
use crate::ledger::{CallBackResponse, Ledger};
use crate::redo::{RedoController, RedoState};
use crate::router::BackendRouter;
use crate::stats::PoolStats;
use bach_primitives::H256;
use bytes::Bytes;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// What happened to one job
#[derive(Debug)]
pub struct JobReport {
    /// Position in the batch
    pub sequence_index: usize,
    /// Transaction hash
    pub tx_hash: H256,
    /// Worker that ran the job
    pub worker_id: usize,
    /// Final execution outcome
    pub outcome: ExecutionOutcome,
    /// Executions performed (1 or 2)
    pub attempts: u32,
    /// Result of the ledger commit callback
    pub commit: Result<(), CallbackError>,
}

impl JobReport {
    /// Whether the ledger accepted the commit
    pub fn is_committed(&self) -> bool {
        self.commit.is_ok()
    }

    /// Whether the job executed and committed without error
    pub fn is_success(&self) -> bool {
        self.outcome.is_success() && self.is_committed()
    }
}

/// Worker owning its own backends
pub struct VmWorker {
    worker_id: usize,
    classifier: ContractClassifier,
    router: BackendRouter,
    ledger: Arc<dyn Ledger>,
    barrier: Arc<OrderingBarrier>,
    stats: Arc<PoolStats>,
}

impl VmWorker {
    /// Create a worker
    pub fn new(
        worker_id: usize,
        router: BackendRouter,
        ledger: Arc<dyn Ledger>,
        barrier: Arc<OrderingBarrier>,
        stats: Arc<PoolStats>,
    ) -> Self {
        Self {
            worker_id,
            classifier: ContractClassifier::new(),
            router,
            ledger,
            barrier,
            stats,
        }
    }

    /// Worker index
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Execute a job and commit its outcome in sequence order
    pub fn vm_job(&mut self, mut job: Job) -> JobReport {
        let tag = job.tag(self.worker_id);
        tracing::debug!(
            worker_id = tag.worker_id,
            tx_hash = %tag.tx_hash,
            tx_idx = tag.tx_idx,
            kind = %job.transaction().kind(),
            "Job started"
        );

        let mut redo = RedoController::new();
        let outcome = redo.run(&tag, |state| self.exec_job(&mut job, state));

        let commit = self.commit(&job, &outcome);
        if let Err(err) = &commit {
            self.stats.record_callback_failure();
            tracing::error!(
                worker_id = tag.worker_id,
                tx_hash = %tag.tx_hash,
                tx_idx = tag.tx_idx,
                error = %err,
                "Commit callback failed"
            );
        }
        self.stats
            .record_job(self.worker_id, outcome.can_redo, !outcome.is_success());

        tracing::debug!(
            worker_id = tag.worker_id,
            tx_hash = %tag.tx_hash,
            tx_idx = tag.tx_idx,
            attempts = redo.attempts(),
            success = outcome.is_success(),
            "Job finished"
        );

        JobReport {
            sequence_index: job.sequence_index(),
            tx_hash: job.tx_hash(),
            worker_id: self.worker_id,
            outcome,
            attempts: redo.attempts(),
            commit,
        }
    }

    /// One attempt: classify, route, execute. Runs from scratch every time.
    fn exec_job(&mut self, job: &mut Job, state: RedoState) -> VmResult<Option<Bytes>> {
        job.context_mut().reset();
        let worker_id = self.worker_id;
        let classifier = &self.classifier;
        let router = &mut self.router;
        let ledger = self.ledger.as_ref();

        let attempt = panic::catch_unwind(AssertUnwindSafe(|| -> VmResult<Option<Bytes>> {
            let classification = classifier.classify(job, ledger).map_err(|err| {
                tracing::error!(
                    worker_id,
                    tx_hash = %job.tx_hash(),
                    tx_idx = job.sequence_index(),
                    can_redo = state == RedoState::Retrying,
                    error = %err,
                    "Contract classification failed"
                );
                err
            })?;
            router.route(job, classification, ledger).map_err(|err| {
                if let VmError::Routing(RoutingError::UnknownBackend { declared, .. }) = &err {
                    tracing::error!(
                        worker_id,
                        tx_hash = %job.tx_hash(),
                        tx_idx = job.sequence_index(),
                        can_redo = state == RedoState::Retrying,
                        declared = %declared,
                        "Can't find backend for contract"
                    );
                }
                err
            })
        }));

        attempt.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!(
                worker_id,
                tx_hash = %job.tx_hash(),
                tx_idx = job.sequence_index(),
                panic = %message,
                "Job execution panicked"
            );
            Err(ExecutionError::Panicked(message).into())
        })
    }

    /// Wait for this job's turn, then call the ledger. The next slot is
    /// signalled when the guard drops, whatever the callback did.
    fn commit(&self, job: &Job, outcome: &ExecutionOutcome) -> Result<(), CallbackError> {
        let _turn = self.barrier.enter(job.sequence_index());
        let response = CallBackResponse {
            tx_hash: job.tx_hash(),
            sequence_index: job.sequence_index(),
            is_can_redo: outcome.ledger_can_redo(),
            result: outcome.result.clone(),
            err: outcome.error.clone(),
        };
        let ledger = self.ledger.as_ref();
        match panic::catch_unwind(AssertUnwindSafe(|| ledger.callback(response))) {
            Ok(result) => result.map_err(CallbackError::from),
            Err(payload) => Err(CallbackError(LedgerError::Rejected(format!(
                "callback panicked: {}",
                panic_message(payload.as_ref())
            )))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendKind, VmBackend};
    use crate::error::{ClassificationError, VmError};
    use crate::memory::MemoryLedger;
    use bach_primitives::Address;
    use bach_types::{ContractCode, Transaction, TxKind};
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Ok,
        Recoverable,
        Fatal,
        Panic,
        RecoverOnSecond,
    }

    struct Scripted {
        kind: BackendKind,
        behaviour: Behaviour,
        calls: Arc<AtomicUsize>,
    }

    impl VmBackend for Scripted {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn execute_job(
            &mut self,
            job: &Job,
            _ledger: &dyn Ledger,
        ) -> Result<Option<Bytes>, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Ok => Ok(job.context().code.clone()),
                Behaviour::Recoverable => Err(BackendError::recoverable("conflict")),
                Behaviour::Fatal => Err(BackendError::fatal("trap")),
                Behaviour::Panic => panic!("interpreter crashed"),
                Behaviour::RecoverOnSecond if n == 0 => Err(BackendError::recoverable("conflict")),
                Behaviour::RecoverOnSecond => Ok(None),
            }
        }
    }

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn worker(ledger: Arc<MemoryLedger>, behaviour: Behaviour) -> (VmWorker, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = BackendRouter::with_backends(vec![Box::new(Scripted {
            kind: BackendKind::Lua,
            behaviour,
            calls: calls.clone(),
        })]);
        let barrier = Arc::new(OrderingBarrier::new(NonZeroUsize::new(1).unwrap()));
        let worker = VmWorker::new(0, router, ledger, barrier, Arc::new(PoolStats::new(1)));
        (worker, calls)
    }

    fn lua_ledger() -> Arc<MemoryLedger> {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .deploy_contract(Some(addr(9)), &ContractCode::new("lua", b"return 1".to_vec()))
            .unwrap();
        ledger
    }

    fn invoke(contract: u8) -> Job {
        Job::new(Transaction::invoke(addr(1), Some(addr(contract)), vec![], 0), 0)
    }

    // ==================== Execution ====================

    #[test]
    fn test_invoke_runs_declared_backend() {
        let ledger = lua_ledger();
        let (mut w, calls) = worker(ledger.clone(), Behaviour::Ok);

        let report = w.vm_job(invoke(9));
        assert!(report.is_success());
        assert_eq!(report.attempts, 1);
        assert_eq!(report.outcome.result.as_deref(), Some(&b"return 1"[..]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let commits = ledger.commits();
        assert_eq!(commits.len(), 1);
        assert!(commits[0].is_can_redo);
        assert!(commits[0].error.is_none());
    }

    #[test]
    fn test_missing_metadata_retried_once() {
        let ledger = Arc::new(MemoryLedger::new());
        let (mut w, calls) = worker(ledger.clone(), Behaviour::Ok);

        let report = w.vm_job(invoke(9));
        assert_eq!(report.attempts, 2);
        assert!(matches!(
            report.outcome.error,
            Some(VmError::Classification(ClassificationError::NotFound { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // Metadata is re-read on the retry
        assert_eq!(ledger.state_reads(), 2);

        let commits = ledger.commits();
        assert!(!commits[0].is_can_redo);
        assert!(commits[0].error.as_deref().unwrap().contains("can't find contract code"));
    }

    #[test]
    fn test_fatal_backend_error_runs_once() {
        let ledger = lua_ledger();
        let (mut w, calls) = worker(ledger.clone(), Behaviour::Fatal);

        let report = w.vm_job(invoke(9));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.attempts, 1);
        assert!(report.is_committed());
        assert!(!report.outcome.is_success());
        assert!(ledger.commits()[0].is_can_redo);
    }

    #[test]
    fn test_recoverable_backend_error_runs_twice() {
        let ledger = lua_ledger();
        let (mut w, calls) = worker(ledger.clone(), Behaviour::Recoverable);

        let report = w.vm_job(invoke(9));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!report.outcome.is_success());
        assert!(!ledger.commits()[0].is_can_redo);
    }

    #[test]
    fn test_retry_can_succeed() {
        let ledger = lua_ledger();
        let (mut w, calls) = worker(ledger.clone(), Behaviour::RecoverOnSecond);

        let report = w.vm_job(invoke(9));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(report.is_success());
        assert!(!ledger.commits()[0].is_can_redo);
        assert_eq!(w.stats.redos(), 1);
    }

    #[test]
    fn test_backend_panic_becomes_error() {
        let ledger = lua_ledger();
        let (mut w, calls) = worker(ledger.clone(), Behaviour::Panic);

        let report = w.vm_job(invoke(9));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            report.outcome.error,
            Some(VmError::Execution(ExecutionError::Panicked(ref msg))) if msg == "interpreter crashed"
        ));
        assert_eq!(ledger.commits().len(), 1);
    }

    #[test]
    fn test_transfer_skips_lookup() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_balance(addr(1), 10);
        let (mut w, calls) = worker(ledger.clone(), Behaviour::Ok);

        let report = w.vm_job(Job::new(Transaction::transfer(addr(1), addr(2), 3, 0), 0));
        assert!(report.is_success());
        assert_eq!(ledger.state_reads(), 0);
        assert_eq!(ledger.transfer_calls(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.balance(&addr(2)), 3);
    }

    #[test]
    fn test_lua_init_skips_lookup() {
        let ledger = Arc::new(MemoryLedger::new());
        let (mut w, calls) = worker(ledger.clone(), Behaviour::Ok);
        let tx = Transaction::deploy(TxKind::LuaContractInit, addr(1), addr(5), vec![1], 0);

        let report = w.vm_job(Job::new(tx, 0));
        assert!(report.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.state_reads(), 0);
    }

    // ==================== Commit ====================

    #[test]
    fn test_callback_error_is_reported_not_retried() {
        let ledger = lua_ledger();
        let (mut w, calls) = worker(ledger.clone(), Behaviour::Ok);
        let job = invoke(9);
        ledger.reject_commit(job.tx_hash());

        let report = w.vm_job(job);
        assert!(report.outcome.is_success());
        assert!(matches!(report.commit, Err(CallbackError(LedgerError::Rejected(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.commits().len(), 1);
        assert_eq!(w.stats.callback_failures(), 1);
        // The next slot is released regardless
        assert!(w.barrier.is_open(0));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }

    // ==================== Logging ====================

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_error_logs_carry_job_fields() {
        let ledger = lua_ledger();
        ledger
            .deploy_contract(Some(addr(8)), &ContractCode::new("wasm", b"x".to_vec()))
            .unwrap();
        let (mut w, _) = worker(ledger, Behaviour::Ok);

        let buffer = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buffer.clone())
            .with_ansi(false)
            .finish();
        let report = tracing::subscriber::with_default(subscriber, || w.vm_job(invoke(8)));
        assert_eq!(report.attempts, 2);

        let output = String::from_utf8(buffer.0.lock().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        let routing: Vec<_> = lines
            .iter()
            .filter(|l| l.contains("Can't find backend for contract"))
            .collect();
        assert_eq!(routing.len(), 2);
        assert!(routing[0].contains("can_redo=false"));
        assert!(routing[1].contains("can_redo=true"));
        for line in &routing {
            assert!(line.contains("worker_id=0"));
            assert!(line.contains("tx_idx=0"));
            assert!(line.contains("tx_hash="));
            assert!(line.contains("declared=wasm"));
        }

        for message in ["tx redo ", "tx redo failed"] {
            let line = lines
                .iter()
                .find(|l| l.contains(message))
                .unwrap_or_else(|| panic!("missing {message:?} in {output}"));
            assert!(line.contains("worker_id=0"));
            assert!(line.contains("tx_idx=0"));
            assert!(line.contains("can_redo=true"));
        }
    }
}
