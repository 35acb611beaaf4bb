//! The ledger as the scheduler sees it.

use std::future::Future;

use crate::error::LedgerResult;
use crate::types::{QueueEntry, Receipt, RequestId, SignedAction, WorkerRecord, WorkerStatus};

/// An append-only, externally ordered job board.
///
/// Reads are snapshots; `push` either applies an action atomically or
/// rejects it with [`LedgerError::Rejected`](crate::LedgerError::Rejected).
pub trait Ledger: Send + Sync + 'static {
    fn queue(&self) -> impl Future<Output = LedgerResult<Vec<QueueEntry>>> + Send;

    /// Claims on one request.
    fn worker_status(&self, request_id: RequestId) -> impl Future<Output = LedgerResult<Vec<WorkerStatus>>> + Send;

    /// Requests `worker` has an unsolved claim on.
    fn claims_of(&self, worker: &str) -> impl Future<Output = LedgerResult<Vec<RequestId>>> + Send;

    fn workers(&self) -> impl Future<Output = LedgerResult<Vec<WorkerRecord>>> + Send;

    fn push(&self, action: SignedAction) -> impl Future<Output = LedgerResult<Receipt>> + Send;
}
