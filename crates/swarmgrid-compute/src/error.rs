//! Compute error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComputeError {
    /// The cancellation check fired mid-computation.
    #[error("inference cancelled")]
    Cancelled,

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("compute failed: {0}")]
    Failed(String),

    #[error("compute task panicked: {0}")]
    Panicked(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ComputeResult<T> = Result<T, ComputeError>;
