//! Scheduler error types.

use swarmgrid_auth::AuthError;
use swarmgrid_compute::ComputeError;
use swarmgrid_ledger::LedgerError;
use swarmgrid_storage::StorageError;
use thiserror::Error;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    /// Consecutive refresh failures reached the configured limit.
    #[error("ledger unreachable after {0} consecutive failures")]
    LedgerUnreachable(u32),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Compute(#[from] ComputeError),

    #[error("signing failed: {0}")]
    Auth(#[from] AuthError),

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("task failed: {0}")]
    Task(String),
}

impl SchedulerError {
    /// The ledger refused the action.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Ledger(e) if e.is_rejected())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Compute(ComputeError::Cancelled))
    }
}
