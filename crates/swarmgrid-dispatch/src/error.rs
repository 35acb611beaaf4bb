//! Dispatch error types.

use swarm_core::WorkerId;
use thiserror::Error;

/// Errors from the worker registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no workers connected")]
    NoWorkersAvailable,

    #[error("all workers are busy")]
    AllWorkersBusy,

    #[error("worker not registered: {0}")]
    UnknownWorker(WorkerId),

    #[error("worker {worker} already busy with job {job}")]
    WorkerBusy { worker: WorkerId, job: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Outcome of a failed job, as surfaced to the submitter.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no workers connected")]
    NoWorkersAvailable,

    #[error("all workers are busy")]
    AllWorkersBusy,

    /// The worker did not acknowledge in time and was evicted.
    #[error("worker {0} is offline")]
    WorkerOffline(WorkerId),

    /// The worker acknowledged but did not deliver in time and was evicted.
    #[error("worker {0} timed out computing")]
    ComputeTimeout(WorkerId),

    /// Reported by the worker, verbatim.
    #[error("{0}")]
    ComputeError(String),

    #[error("dispatcher shut down")]
    Shutdown,

    #[error(transparent)]
    Bus(#[from] swarmgrid_bus::BusError),
}

impl DispatchError {
    /// Whether resubmitting the same job may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::NoWorkersAvailable
                | DispatchError::AllWorkersBusy
                | DispatchError::WorkerOffline(_)
                | DispatchError::ComputeTimeout(_)
        )
    }
}

impl From<RegistryError> for DispatchError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NoWorkersAvailable => DispatchError::NoWorkersAvailable,
            RegistryError::AllWorkersBusy | RegistryError::WorkerBusy { .. } => {
                DispatchError::AllWorkersBusy
            }
            RegistryError::UnknownWorker(worker) => DispatchError::WorkerOffline(worker),
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
