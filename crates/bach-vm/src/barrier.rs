//! Ordering barrier
//!
//! Jobs execute in parallel but must commit in sequence order. The barrier
//! holds one gate per worker slot: job `i` waits on gate `i % N` before its
//! commit and signals gate `(i + 1) % N` afterwards. Job 0 never waits.
//!
//! A gate is a latched flag, so a signal sent before the waiter arrives is
//! not lost. Each signal is consumed by exactly one wait.

use parking_lot::{Condvar, Mutex};
use std::num::NonZeroUsize;
use std::time::Duration;

/// One rendezvous point
#[derive(Debug, Default)]
pub struct OrderingGate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl OrderingGate {
    /// Create a closed gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the gate is signalled, then close it again.
    ///
    /// With a watchdog set, a warning is logged every time the threshold
    /// passes without a signal. The wait continues regardless.
    pub fn wait(&self, slot: usize, watchdog: Option<Duration>) {
        let mut open = self.open.lock();
        while !*open {
            match watchdog {
                Some(threshold) => {
                    if self.cond.wait_for(&mut open, threshold).timed_out() && !*open {
                        tracing::warn!(
                            slot,
                            waited_ms = threshold.as_millis() as u64,
                            "Ordering gate wait exceeded watchdog threshold"
                        );
                    }
                }
                None => self.cond.wait(&mut open),
            }
        }
        *open = false;
    }

    /// Signal the gate
    pub fn notify(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.cond.notify_one();
    }

    /// Close the gate, dropping any pending signal
    pub fn reset(&self) {
        *self.open.lock() = false;
    }

    /// Whether a signal is pending
    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }
}

/// Gate array shared by all workers of a pool
#[derive(Debug)]
pub struct OrderingBarrier {
    gates: Vec<OrderingGate>,
    watchdog: Option<Duration>,
}

impl OrderingBarrier {
    /// Create a barrier with one gate per worker
    pub fn new(size: NonZeroUsize) -> Self {
        Self {
            gates: (0..size.get()).map(|_| OrderingGate::new()).collect(),
            watchdog: None,
        }
    }

    /// Enable the wait watchdog
    pub fn with_watchdog(mut self, threshold: Option<Duration>) -> Self {
        self.watchdog = threshold;
        self
    }

    /// Number of gates
    pub fn size(&self) -> usize {
        self.gates.len()
    }

    /// Gate slot used by the job at `sequence_index`
    pub fn slot_for(&self, sequence_index: usize) -> usize {
        sequence_index % self.gates.len()
    }

    /// Wait on a slot
    pub fn wait(&self, slot: usize) {
        self.gates[slot % self.gates.len()].wait(slot, self.watchdog);
    }

    /// Signal a slot
    pub fn notify(&self, slot: usize) {
        self.gates[slot % self.gates.len()].notify();
    }

    /// Whether a slot has a pending signal
    pub fn is_open(&self, slot: usize) -> bool {
        self.gates[slot % self.gates.len()].is_open()
    }

    /// Drop all pending signals. Must not run while a batch is in flight.
    pub fn reset(&self) {
        for gate in &self.gates {
            gate.reset();
        }
    }

    /// Wait for the turn of `sequence_index` to commit.
    ///
    /// The returned guard signals the next slot when dropped, on every exit
    /// path including unwinding.
    pub fn enter(&self, sequence_index: usize) -> CommitGuard<'_> {
        if sequence_index != 0 {
            self.wait(self.slot_for(sequence_index));
        }
        CommitGuard {
            barrier: self,
            next_slot: self.slot_for(sequence_index + 1),
        }
    }
}

/// Commit turn held by one job
#[derive(Debug)]
pub struct CommitGuard<'a> {
    barrier: &'a OrderingBarrier,
    next_slot: usize,
}

impl CommitGuard<'_> {
    /// Slot that will be signalled on drop
    pub fn next_slot(&self) -> usize {
        self.next_slot
    }
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.barrier.notify(self.next_slot);
    }
}
