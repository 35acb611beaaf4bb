//! Cached view of the ledger, refreshed on its own clock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use swarmgrid_ledger::{Ledger, LedgerResult, QueueEntry, RequestId, WorkerRecord, WorkerStatus};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// Everything selection needs, read in one refresh.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub queue: Vec<QueueEntry>,
    pub statuses: HashMap<RequestId, Vec<WorkerStatus>>,
    pub own_claims: HashSet<RequestId>,
    pub roster: Vec<WorkerRecord>,
}

impl LedgerSnapshot {
    pub async fn fetch<L: Ledger>(ledger: &L, account: &str) -> LedgerResult<Self> {
        let queue = ledger.queue().await?;
        let mut statuses = HashMap::with_capacity(queue.len());
        for entry in &queue {
            statuses.insert(entry.id, ledger.worker_status(entry.id).await?);
        }
        let own_claims = ledger.claims_of(account).await?.into_iter().collect();
        let roster = ledger.workers().await?;
        Ok(Self {
            queue,
            statuses,
            own_claims,
            roster,
        })
    }

    /// Workers other than `me` holding a claim on `request_id`.
    pub fn competitors<'a>(&'a self, request_id: RequestId, me: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.statuses
            .get(&request_id)
            .into_iter()
            .flatten()
            .map(|s| s.worker.as_str())
            .filter(move |w| *w != me)
    }

    /// Whether `account` has claimed `request_id`, solved or not.
    pub fn claimed_by(&self, request_id: RequestId, account: &str) -> bool {
        self.own_claims.contains(&request_id)
            || self
                .statuses
                .get(&request_id)
                .is_some_and(|s| s.iter().any(|s| s.worker == account))
    }

    pub fn is_registered(&self, account: &str) -> bool {
        self.roster.iter().any(|w| w.account == account)
    }

    /// Advertised addresses of the requester and of other workers on the
    /// request; they are the likeliest holders of its inputs.
    pub fn source_peers(&self, entry: &QueueEntry, me: &str) -> Vec<String> {
        let holders: HashSet<&str> = self
            .competitors(entry.id, me)
            .chain(std::iter::once(entry.requester.as_str()))
            .collect();
        self.roster
            .iter()
            .filter(|w| w.account != me && !w.url.is_empty() && holders.contains(w.account.as_str()))
            .map(|w| w.url.clone())
            .collect()
    }
}

/// Publishes a fresh [`LedgerSnapshot`] every interval.
pub struct Refresher<L: Ledger> {
    ledger: Arc<L>,
    account: String,
    interval: Duration,
    max_failures: u32,
    tx: watch::Sender<Arc<LedgerSnapshot>>,
}

impl<L: Ledger> Refresher<L> {
    pub fn new(
        ledger: Arc<L>,
        account: &str,
        interval: Duration,
        max_failures: u32,
    ) -> (Self, watch::Receiver<Arc<LedgerSnapshot>>) {
        let (tx, rx) = watch::channel(Arc::new(LedgerSnapshot::default()));
        let refresher = Self {
            ledger,
            account: account.to_string(),
            interval,
            max_failures: max_failures.max(1),
            tx,
        };
        (refresher, rx)
    }

    /// Refresh until shutdown; fails once the ledger stays unreachable
    /// for `max_failures` refreshes in a row.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> SchedulerResult<()> {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                _ = tick.tick() => {}
            }
            match LedgerSnapshot::fetch(self.ledger.as_ref(), &self.account).await {
                Ok(snapshot) => {
                    failures = 0;
                    debug!(
                        queue = snapshot.queue.len(),
                        own_claims = snapshot.own_claims.len(),
                        roster = snapshot.roster.len(),
                        "ledger snapshot refreshed"
                    );
                    self.tx.send_replace(Arc::new(snapshot));
                }
                Err(e) => {
                    failures += 1;
                    warn!(failures, max = self.max_failures, error = %e, "ledger refresh failed");
                    if failures >= self.max_failures {
                        error!(failures, "ledger unreachable, giving up");
                        return Err(SchedulerError::LedgerUnreachable(failures));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicU32, Ordering};

    use swarmgrid_ledger::{LedgerError, LocalLedger, Receipt, SignedAction};

    use super::*;

    /// Wraps a ledger and fails reads while `failing` is non-zero.
    pub struct FlakyLedger {
        pub inner: LocalLedger,
        pub failing: AtomicU32,
    }

    impl FlakyLedger {
        pub fn new(failing: u32) -> Self {
            Self {
                inner: LocalLedger::open_in_memory().unwrap(),
                failing: AtomicU32::new(failing),
            }
        }

        fn gate(&self) -> LedgerResult<()> {
            let left = self.failing.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(());
            }
            self.failing.store(left - 1, Ordering::SeqCst);
            Err(LedgerError::Unreachable("connection refused".to_string()))
        }
    }

    impl Ledger for FlakyLedger {
        async fn queue(&self) -> LedgerResult<Vec<QueueEntry>> {
            self.gate()?;
            self.inner.queue().await
        }

        async fn worker_status(&self, request_id: RequestId) -> LedgerResult<Vec<WorkerStatus>> {
            self.inner.worker_status(request_id).await
        }

        async fn claims_of(&self, worker: &str) -> LedgerResult<Vec<RequestId>> {
            self.inner.claims_of(worker).await
        }

        async fn workers(&self) -> LedgerResult<Vec<WorkerRecord>> {
            self.inner.workers().await
        }

        async fn push(&self, action: SignedAction) -> LedgerResult<Receipt> {
            self.inner.push(action).await
        }
    }
}
