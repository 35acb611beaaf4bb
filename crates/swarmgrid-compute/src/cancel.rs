//! Cooperative cancellation passed into the compute hook.

use tokio_util::sync::CancellationToken;

use crate::error::{ComputeError, ComputeResult};

/// A pollable cancellation flag.
///
/// The backend calls [`checkpoint`](Self::checkpoint) at fixed steps; the
/// owner calls [`cancel`](Self::cancel) from any task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn checkpoint(&self) -> ComputeResult<()> {
        if self.is_cancelled() {
            Err(ComputeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A token cancelled together with this one.
    pub fn child(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }

    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }
}
