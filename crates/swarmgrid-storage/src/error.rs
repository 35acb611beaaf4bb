//! Storage error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Every mirror failed for every attempt.
    #[error("content unresolvable: {0}")]
    UnresolvableContent(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;
