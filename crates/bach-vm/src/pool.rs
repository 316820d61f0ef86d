//! Worker pool
//!
//! A fixed set of OS threads, each owning one [`VmWorker`]. Job `i` of a
//! batch is queued to worker `i % N`, so every worker sees its jobs in
//! increasing sequence order and the ordering barrier can always make
//! progress.

use crate::backend::BackendFactory;
use crate::barrier::OrderingBarrier;
use crate::config::VmConfig;
use crate::error::{CallbackError, PoolError, PoolResult};
use crate::job::Job;
use crate::ledger::Ledger;
use crate::router::BackendRouter;
use crate::stats::{PoolStats, StatsSnapshot};
use crate::worker::{JobReport, VmWorker};
use bach_types::Transaction;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Reports of one batch, in sequence order
#[derive(Debug, Default)]
pub struct BatchReport {
    reports: Vec<JobReport>,
}

impl BatchReport {
    /// Number of jobs
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// Whether the batch was empty
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Report for the job at `sequence_index`
    pub fn get(&self, sequence_index: usize) -> Option<&JobReport> {
        self.reports.get(sequence_index)
    }

    /// All reports
    pub fn reports(&self) -> &[JobReport] {
        &self.reports
    }

    /// Consume into the reports
    pub fn into_reports(self) -> Vec<JobReport> {
        self.reports
    }

    /// Jobs whose execution ended with an error
    pub fn failed(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| !r.outcome.is_success())
            .count()
    }

    /// First commit callback failure, by sequence index
    pub fn first_callback_error(&self) -> Option<(usize, &CallbackError)> {
        self.reports
            .iter()
            .find_map(|r| r.commit.as_ref().err().map(|e| (r.sequence_index, e)))
    }
}

/// Fixed-size pool of VM workers
pub struct WorkerPool {
    config: VmConfig,
    queues: Vec<Sender<Job>>,
    reports: Receiver<JobReport>,
    handles: Vec<JoinHandle<()>>,
    barrier: Arc<OrderingBarrier>,
    stats: Arc<PoolStats>,
    batch_lock: Mutex<()>,
}

impl WorkerPool {
    /// Spawn the workers. Each gets its own backends from `factory`.
    pub fn new(
        config: VmConfig,
        ledger: Arc<dyn Ledger>,
        factory: &dyn BackendFactory,
    ) -> PoolResult<Self> {
        let size = config.validate()?;
        let worker_count = size.get();
        let barrier = Arc::new(OrderingBarrier::new(size).with_watchdog(config.gate_watchdog()));
        let stats = Arc::new(PoolStats::new(worker_count));
        let (report_tx, report_rx) = unbounded();

        let mut pool = Self {
            config,
            queues: Vec::with_capacity(worker_count),
            reports: report_rx,
            handles: Vec::with_capacity(worker_count),
            barrier,
            stats,
            batch_lock: Mutex::new(()),
        };

        for worker_id in 0..worker_count {
            let router = BackendRouter::with_backends(factory.create(worker_id));
            let worker = VmWorker::new(
                worker_id,
                router,
                ledger.clone(),
                pool.barrier.clone(),
                pool.stats.clone(),
            );
            let (job_tx, job_rx) = unbounded::<Job>();
            let reports = report_tx.clone();

            let handle = thread::Builder::new()
                .name(format!("{}-{}", pool.config.thread_name_prefix, worker_id))
                .spawn(move || run_worker(worker, job_rx, reports))
                .map_err(|source| PoolError::Spawn { worker_id, source })?;

            pool.queues.push(job_tx);
            pool.handles.push(handle);
        }

        tracing::info!(
            workers = worker_count,
            watchdog_ms = ?pool.config.gate_watchdog_ms,
            "VM worker pool started"
        );
        Ok(pool)
    }

    /// Number of workers
    pub fn worker_count(&self) -> usize {
        self.barrier.size()
    }

    /// Pool configuration
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Shared counters
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Snapshot of the shared counters
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Execute a batch in parallel and commit it in order.
    ///
    /// Batches are serialized; a concurrent call waits for the running one.
    pub fn execute_batch(&self, transactions: Vec<Transaction>) -> PoolResult<BatchReport> {
        let _batch = self.batch_lock.lock();
        if self.queues.is_empty() {
            return Err(PoolError::ShutDown);
        }
        let expected = transactions.len();
        if expected == 0 {
            return Ok(BatchReport::default());
        }

        self.barrier.reset();
        self.stats.record_batch();
        tracing::debug!(jobs = expected, "Dispatching batch");

        let worker_count = self.queues.len();
        for (idx, tx) in transactions.into_iter().enumerate() {
            let worker_id = idx % worker_count;
            if self.queues[worker_id].send(Job::new(tx, idx)).is_err() {
                // Jobs already queued still report; keep them out of the next batch
                let drained = self.collect(idx).map_or(0, |r| r.len());
                tracing::error!(
                    worker_id,
                    dispatched = idx,
                    drained,
                    "Worker gone, batch aborted"
                );
                return Err(PoolError::WorkerGone(worker_id));
            }
        }

        let mut reports = self.collect(expected)?;
        reports.sort_by_key(|r| r.sequence_index);

        let batch = BatchReport { reports };
        tracing::debug!(
            jobs = expected,
            failed = batch.failed(),
            "Batch committed"
        );
        Ok(batch)
    }

    fn collect(&self, expected: usize) -> PoolResult<Vec<JobReport>> {
        let mut reports = Vec::with_capacity(expected);
        while reports.len() < expected {
            match self.reports.recv() {
                Ok(report) => reports.push(report),
                Err(_) => {
                    return Err(PoolError::Incomplete {
                        expected,
                        received: reports.len(),
                    })
                }
            }
        }
        Ok(reports)
    }

    /// Close the job queues and join the worker threads
    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.queues.clear();
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().map(str::to_string);
            if handle.join().is_err() {
                tracing::error!(thread = ?name, "Worker thread panicked");
            }
        }
        tracing::info!("VM worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(mut worker: VmWorker, jobs: Receiver<Job>, reports: Sender<JobReport>) {
    tracing::debug!(worker_id = worker.worker_id(), "Worker started");
    for job in jobs.iter() {
        let report = worker.vm_job(job);
        if reports.send(report).is_err() {
            break;
        }
    }
    tracing::debug!(worker_id = worker.worker_id(), "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendKind, VmBackend};
    use crate::memory::MemoryLedger;
    use bach_primitives::Address;
    use bach_types::{ContractCode, TxKind};
    use bytes::Bytes;

    struct Echo(BackendKind);

    impl VmBackend for Echo {
        fn kind(&self) -> BackendKind {
            self.0
        }

        fn execute_job(
            &mut self,
            job: &Job,
            _ledger: &dyn Ledger,
        ) -> Result<Option<Bytes>, BackendError> {
            Ok(Some(Bytes::from(job.sequence_index().to_be_bytes().to_vec())))
        }
    }

    fn echo_factory(_worker_id: usize) -> Vec<Box<dyn VmBackend>> {
        vec![Box::new(Echo(BackendKind::Lua)), Box::new(Echo(BackendKind::Js))]
    }

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn pool(workers: usize, ledger: Arc<MemoryLedger>) -> WorkerPool {
        WorkerPool::new(VmConfig::with_workers(workers), ledger, &echo_factory).unwrap()
    }

    #[test]
    fn test_zero_workers_rejected() {
        let ledger = Arc::new(MemoryLedger::new());
        let err = WorkerPool::new(VmConfig::with_workers(0), ledger, &echo_factory)
            .err()
            .unwrap();
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[test]
    fn test_empty_batch() {
        let ledger = Arc::new(MemoryLedger::new());
        let pool = pool(2, ledger.clone());
        let report = pool.execute_batch(Vec::new()).unwrap();
        assert!(report.is_empty());
        assert!(ledger.commits().is_empty());
    }

    #[test]
    fn test_batch_commits_in_order() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .deploy_contract(Some(addr(9)), &ContractCode::new("js", b"x".to_vec()))
            .unwrap();
        let pool = pool(3, ledger.clone());

        let txs: Vec<_> = (0..10u64)
            .map(|n| match n % 3 {
                0 => Transaction::invoke(addr(1), Some(addr(9)), vec![], n),
                1 => Transaction::deploy(TxKind::LuaContractInit, addr(1), addr(2), vec![1], n),
                _ => Transaction::transfer(addr(1), addr(2), 0, n),
            })
            .collect();

        let report = pool.execute_batch(txs).unwrap();
        assert_eq!(report.len(), 10);
        assert_eq!(report.failed(), 0);
        assert_eq!(ledger.commit_order(), (0..10).collect::<Vec<_>>());
        for (idx, r) in report.reports().iter().enumerate() {
            assert_eq!(r.sequence_index, idx);
            assert_eq!(r.worker_id, idx % 3);
        }
    }

    #[test]
    fn test_consecutive_batches() {
        let ledger = Arc::new(MemoryLedger::new());
        let pool = pool(4, ledger.clone());

        for round in 0..5u64 {
            let txs: Vec<_> = (0..(round as usize * 3 + 1))
                .map(|n| {
                    Transaction::deploy(TxKind::JsContractInit, addr(1), addr(2), vec![], n as u64)
                })
                .collect();
            let expected = txs.len();
            pool.execute_batch(txs).unwrap();

            let order = ledger.commit_order();
            assert_eq!(order, (0..expected).collect::<Vec<_>>());
            ledger.clear_log();
        }
        assert_eq!(pool.snapshot().batches, 5);
    }

    #[test]
    fn test_callback_error_surfaces_in_report() {
        let ledger = Arc::new(MemoryLedger::new());
        let pool = pool(2, ledger.clone());
        let txs: Vec<_> = (0..4u64)
            .map(|n| Transaction::deploy(TxKind::JsContractInit, addr(1), addr(2), vec![], n))
            .collect();
        ledger.reject_commit(txs[2].hash());

        let report = pool.execute_batch(txs).unwrap();
        let (idx, _) = report.first_callback_error().unwrap();
        assert_eq!(idx, 2);
        assert_eq!(ledger.commit_order(), vec![0, 1, 2, 3]);
        assert_eq!(pool.stats().callback_failures(), 1);
    }

    #[test]
    fn test_dead_worker_reports_stay_in_their_batch() {
        let ledger = Arc::new(MemoryLedger::new());
        let mut pool = pool(2, ledger.clone());
        let (dead, gone) = unbounded::<Job>();
        drop(gone);
        pool.queues[1] = dead;

        let first: Vec<_> = (0..4u64)
            .map(|n| Transaction::deploy(TxKind::JsContractInit, addr(1), addr(2), vec![], n))
            .collect();
        assert!(matches!(
            pool.execute_batch(first.clone()),
            Err(PoolError::WorkerGone(1))
        ));
        assert_eq!(ledger.commit_order(), vec![0]);

        let second = Transaction::deploy(TxKind::LuaContractInit, addr(3), addr(4), vec![], 9);
        let report = pool.execute_batch(vec![second.clone()]).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report.get(0).unwrap().tx_hash, second.hash());
        assert_ne!(report.get(0).unwrap().tx_hash, first[0].hash());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let ledger = Arc::new(MemoryLedger::new());
        let mut pool = pool(2, ledger);
        pool.shutdown();
        pool.shutdown();
        assert!(matches!(
            pool.execute_batch(vec![Transaction::transfer(addr(1), addr(2), 0, 0)]),
            Err(PoolError::ShutDown)
        ));
    }
}
