//! Pool statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-worker counters
#[derive(Debug, Default)]
pub struct WorkerInfo {
    all_txs: AtomicU64,
    redo_txs: AtomicU64,
    failed_txs: AtomicU64,
}

impl WorkerInfo {
    /// Jobs processed
    pub fn all_txs(&self) -> u64 {
        self.all_txs.load(Ordering::Relaxed)
    }

    /// Jobs that used their retry
    pub fn redo_txs(&self) -> u64 {
        self.redo_txs.load(Ordering::Relaxed)
    }

    /// Jobs that ended with an error
    pub fn failed_txs(&self) -> u64 {
        self.failed_txs.load(Ordering::Relaxed)
    }
}

/// Counters shared by a pool and its workers
#[derive(Debug)]
pub struct PoolStats {
    jobs: AtomicU64,
    redos: AtomicU64,
    failed: AtomicU64,
    callback_failures: AtomicU64,
    batches: AtomicU64,
    workers: Vec<WorkerInfo>,
}

impl PoolStats {
    /// Create zeroed counters for `worker_count` workers
    pub fn new(worker_count: usize) -> Self {
        Self {
            jobs: AtomicU64::new(0),
            redos: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            workers: (0..worker_count).map(|_| WorkerInfo::default()).collect(),
        }
    }

    /// Record a finished job
    pub fn record_job(&self, worker_id: usize, redone: bool, failed: bool) {
        self.jobs.fetch_add(1, Ordering::Relaxed);
        if redone {
            self.redos.fetch_add(1, Ordering::Relaxed);
        }
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(info) = self.workers.get(worker_id) {
            info.all_txs.fetch_add(1, Ordering::Relaxed);
            if redone {
                info.redo_txs.fetch_add(1, Ordering::Relaxed);
            }
            if failed {
                info.failed_txs.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record a failed commit callback
    pub fn record_callback_failure(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dispatched batch
    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Total jobs processed
    pub fn jobs(&self) -> u64 {
        self.jobs.load(Ordering::Relaxed)
    }

    /// Total jobs retried
    pub fn redos(&self) -> u64 {
        self.redos.load(Ordering::Relaxed)
    }

    /// Total jobs that ended with an error
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Total failed commit callbacks
    pub fn callback_failures(&self) -> u64 {
        self.callback_failures.load(Ordering::Relaxed)
    }

    /// Counters of one worker
    pub fn worker(&self, worker_id: usize) -> Option<&WorkerInfo> {
        self.workers.get(worker_id)
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            jobs: self.jobs(),
            redos: self.redos(),
            failed: self.failed(),
            callback_failures: self.callback_failures(),
            workers: self
                .workers
                .iter()
                .enumerate()
                .map(|(worker_id, info)| WorkerSnapshot {
                    worker_id,
                    all_txs: info.all_txs(),
                    redo_txs: info.redo_txs(),
                    failed_txs: info.failed_txs(),
                })
                .collect(),
        }
    }
}

/// Serializable copy of one worker's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    /// Worker index
    pub worker_id: usize,
    /// Jobs processed
    pub all_txs: u64,
    /// Jobs that used their retry
    pub redo_txs: u64,
    /// Jobs that ended with an error
    pub failed_txs: u64,
}

/// Serializable copy of the pool counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Batches dispatched
    pub batches: u64,
    /// Jobs processed
    pub jobs: u64,
    /// Jobs retried
    pub redos: u64,
    /// Jobs that ended with an error
    pub failed: u64,
    /// Failed commit callbacks
    pub callback_failures: u64,
    /// Per-worker counters
    pub workers: Vec<WorkerSnapshot>,
}

impl StatsSnapshot {
    /// Export as pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export as compact JSON
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
