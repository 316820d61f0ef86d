//! Redo controller
//!
//! A job gets at most one retry, and only after a recoverable failure.
//! The retry repeats classification, routing and execution from scratch.

use crate::error::{VmError, VmResult};
use crate::job::{ExecutionOutcome, JobTag};
use bytes::Bytes;

/// Redo state of one job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedoState {
    /// First execution pending or running
    FirstAttempt,
    /// The single retry is pending or running
    Retrying,
    /// No more attempts
    Done,
}

/// Per-job redo state machine
#[derive(Debug)]
pub struct RedoController {
    state: RedoState,
    can_redo: bool,
    attempts: u32,
}

impl Default for RedoController {
    fn default() -> Self {
        Self::new()
    }
}

impl RedoController {
    /// Maximum executions per job
    pub const MAX_ATTEMPTS: u32 = 2;

    /// Fresh controller for a new job
    pub fn new() -> Self {
        Self {
            state: RedoState::FirstAttempt,
            can_redo: false,
            attempts: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> RedoState {
        self.state
    }

    /// Whether the retry has been spent
    pub fn can_redo(&self) -> bool {
        self.can_redo
    }

    /// Executions so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record the result of the attempt made in the current state
    pub fn advance(&mut self, error: Option<&VmError>) -> RedoState {
        self.state = match (self.state, error) {
            (RedoState::FirstAttempt, Some(err)) if err.is_recoverable() => {
                self.can_redo = true;
                RedoState::Retrying
            }
            _ => RedoState::Done,
        };
        self.state
    }

    /// Drive `attempt` until the controller is done.
    ///
    /// `attempt` receives the state it runs under, so callers can tell a
    /// first execution from the retry.
    pub fn run<F>(&mut self, tag: &JobTag, mut attempt: F) -> ExecutionOutcome
    where
        F: FnMut(RedoState) -> VmResult<Option<Bytes>>,
    {
        loop {
            let state = self.state;
            self.attempts += 1;
            let result = attempt(state);

            match self.advance(result.as_ref().err()) {
                RedoState::Retrying => {
                    if let Err(err) = &result {
                        tracing::warn!(
                            worker_id = tag.worker_id,
                            tx_hash = %tag.tx_hash,
                            tx_idx = tag.tx_idx,
                            can_redo = self.can_redo,
                            error = %err,
                            "tx redo"
                        );
                    }
                }
                RedoState::Done | RedoState::FirstAttempt => {
                    if let Err(err) = &result {
                        if state == RedoState::Retrying {
                            tracing::error!(
                                worker_id = tag.worker_id,
                                tx_hash = %tag.tx_hash,
                                tx_idx = tag.tx_idx,
                                can_redo = self.can_redo,
                                error = %err,
                                "tx redo failed"
                            );
                        } else {
                            tracing::error!(
                                worker_id = tag.worker_id,
                                tx_hash = %tag.tx_hash,
                                tx_idx = tag.tx_idx,
                                can_redo = self.can_redo,
                                error = %err,
                                "tx failed, not retryable"
                            );
                        }
                    }
                    return ExecutionOutcome::from_attempt(result, self.can_redo);
                }
            }
        }
    }
}
