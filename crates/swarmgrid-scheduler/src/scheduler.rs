//! QueueScheduler — the pull-mode worker loop.
//!
//! Each cycle reads the latest ledger snapshot, picks the best eligible
//! request and claims it. A successful claim spawns a job task that fetches
//! inputs, computes, publishes and submits. Any failure after the claim
//! releases it with a cancel action.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::SeedableRng;
use rand::rngs::StdRng;
use sha2::{Digest, Sha256};
use swarm_core::config::SchedulerConfig;
use swarmgrid_auth::Signer;
use swarmgrid_compute::{CancelToken, ComputeBackend, ComputeExecutor};
use swarmgrid_ledger::{Ledger, LedgerAction, Receipt, RequestId, SignedAction};
use swarmgrid_storage::{BlobStore, ResultPublisher};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::select::{Candidate, CandidateFilter, select_candidates};
use crate::snapshot::{LedgerSnapshot, Refresher};

/// How long in-flight jobs get to release their claims on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// A released request is not reclaimed for this many refresh intervals.
const FAILURE_COOLDOWN_REFRESHES: u32 = 5;

/// Accepts any non-empty blob.
pub fn non_empty(bytes: &[u8]) -> bool {
    !bytes.is_empty()
}

/// Hex SHA-256, as submitted to the ledger.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

type JobOutcome = (RequestId, SchedulerResult<String>);

pub struct QueueScheduler<L: Ledger, S: BlobStore, B: ComputeBackend> {
    account: String,
    ledger: Arc<L>,
    publisher: Arc<ResultPublisher<S>>,
    executor: ComputeExecutor<B>,
    signer: Option<Signer>,
    validate: fn(&[u8]) -> bool,
    filter: CandidateFilter,
    url: String,
    poll_interval: Duration,
    refresh_interval: Duration,
    max_inflight: usize,
    max_ledger_failures: u32,
    failure_cooldown: Option<Duration>,
}

impl<L: Ledger, S: BlobStore, B: ComputeBackend> QueueScheduler<L, S, B> {
    pub fn new(
        ledger: Arc<L>,
        publisher: Arc<ResultPublisher<S>>,
        executor: ComputeExecutor<B>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            account: config.account.clone(),
            ledger,
            publisher,
            executor,
            signer: None,
            validate: non_empty,
            filter: CandidateFilter::from_config(config),
            url: String::new(),
            poll_interval: config.poll_interval(),
            refresh_interval: config.refresh_interval(),
            max_inflight: config.max_inflight.max(1),
            max_ledger_failures: config.max_ledger_failures,
            failure_cooldown: None,
        }
    }

    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Validator applied to fetched inputs.
    pub fn with_input_validator(mut self, validate: fn(&[u8]) -> bool) -> Self {
        self.validate = validate;
        self
    }

    /// Endpoint advertised when registering on the ledger.
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// How long a request whose job failed is left alone. Defaults to a
    /// few refresh intervals.
    pub fn with_failure_cooldown(mut self, cooldown: Duration) -> Self {
        self.failure_cooldown = Some(cooldown);
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn context(&self) -> Arc<JobContext<L, S, B>> {
        Arc::new(JobContext {
            account: self.account.clone(),
            ledger: self.ledger.clone(),
            publisher: self.publisher.clone(),
            executor: self.executor.clone(),
            signer: self.signer.clone(),
            non_compete: Arc::new(self.filter.non_compete.clone()),
            validate: self.validate,
        })
    }

    /// Run until shutdown or until the ledger stays unreachable.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> SchedulerResult<()> {
        let ctx = self.context();
        self.ensure_registered(&ctx).await?;

        let (refresher, snapshots) = Refresher::new(
            self.ledger.clone(),
            &self.account,
            self.refresh_interval,
            self.max_ledger_failures,
        );
        let mut refresh_task = tokio::spawn(refresher.run(shutdown.clone()));
        let mut jobs: JoinSet<JobOutcome> = JoinSet::new();
        let mut inflight: HashSet<RequestId> = HashSet::new();
        let mut cooling: HashMap<RequestId, Instant> = HashMap::new();
        let cooldown = self
            .failure_cooldown
            .unwrap_or(self.refresh_interval * FAILURE_COOLDOWN_REFRESHES);
        let cancel_all = CancelToken::new();
        let mut rng = StdRng::from_os_rng();
        info!(account = %self.account, max_inflight = self.max_inflight, "scheduler started");

        let result = loop {
            tokio::select! {
                _ = shutdown.changed() => break Ok(()),
                finished = &mut refresh_task => {
                    break match finished {
                        Ok(result) => result,
                        Err(e) => Err(SchedulerError::Task(e.to_string())),
                    };
                }
                Some(done) = jobs.join_next() => {
                    if let Some(failed) = Self::reap(done, &mut inflight) {
                        cooling.insert(failed, Instant::now() + cooldown);
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    if jobs.len() >= self.max_inflight {
                        continue;
                    }
                    let now = Instant::now();
                    cooling.retain(|_, until| *until > now);
                    let snapshot = snapshots.borrow().clone();
                    let Some(candidate) = select_candidates(&snapshot, &self.filter, &mut rng)
                        .into_iter()
                        .find(|c| !inflight.contains(&c.entry.id) && !cooling.contains_key(&c.entry.id))
                    else {
                        continue;
                    };
                    let request_id = candidate.entry.id;
                    match ctx.push(LedgerAction::WorkBegin { request_id }).await {
                        Ok(_) => {
                            info!(request = request_id, reward = candidate.entry.reward, "claimed request");
                            inflight.insert(request_id);
                            jobs.spawn(run_job(ctx.clone(), candidate, snapshots.clone(), cancel_all.child()));
                        }
                        Err(e) if e.is_rejected() => debug!(request = request_id, error = %e, "claim lost"),
                        Err(e) => warn!(request = request_id, error = %e, "claim failed"),
                    }
                }
            }
        };

        refresh_task.abort();
        cancel_all.cancel();
        if !jobs.is_empty() {
            info!(inflight = jobs.len(), "waiting for in-flight jobs to release");
            let drain = async {
                while let Some(done) = jobs.join_next().await {
                    Self::reap(done, &mut inflight);
                }
            };
            if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
                warn!("in-flight jobs did not finish, aborting");
                jobs.abort_all();
            }
        }
        info!(account = %self.account, "scheduler stopped");
        result
    }

    /// Returns the request id when the job released its claim.
    fn reap(done: Result<JobOutcome, tokio::task::JoinError>, inflight: &mut HashSet<RequestId>) -> Option<RequestId> {
        match done {
            Ok((request_id, outcome)) => {
                inflight.remove(&request_id);
                match outcome {
                    Ok(cid) => {
                        debug!(request = request_id, %cid, "job done");
                        None
                    }
                    Err(e) => {
                        debug!(request = request_id, error = %e, "job ended without result");
                        Some(request_id)
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "job task failed");
                None
            }
        }
    }

    async fn ensure_registered(&self, ctx: &JobContext<L, S, B>) -> SchedulerResult<()> {
        let roster = self.ledger.workers().await?;
        if roster.iter().any(|w| w.account == self.account) {
            return Ok(());
        }
        ctx.push(LedgerAction::RegWorker { url: self.url.clone() }).await?;
        info!(account = %self.account, "registered on ledger");
        Ok(())
    }
}

/// What a job task shares with the scheduler.
pub(crate) struct JobContext<L: Ledger, S: BlobStore, B: ComputeBackend> {
    pub(crate) account: String,
    pub(crate) ledger: Arc<L>,
    pub(crate) publisher: Arc<ResultPublisher<S>>,
    pub(crate) executor: ComputeExecutor<B>,
    pub(crate) signer: Option<Signer>,
    pub(crate) non_compete: Arc<HashSet<String>>,
    pub(crate) validate: fn(&[u8]) -> bool,
}

impl<L: Ledger, S: BlobStore, B: ComputeBackend> JobContext<L, S, B> {
    pub(crate) async fn push(&self, action: LedgerAction) -> SchedulerResult<Receipt> {
        let signed = SignedAction::new(&self.account, action).signed_by(self.signer.as_ref())?;
        Ok(self.ledger.push(signed).await?)
    }

    /// Fetch, compute, publish, submit. Returns the result CID.
    async fn process(&self, candidate: &Candidate, peers: &[String], cancel: CancelToken) -> SchedulerResult<String> {
        let entry = &candidate.entry;
        if !entry.inputs.is_empty() && !peers.is_empty() {
            let dialed = self.publisher.connect_peers(peers).await;
            debug!(request = entry.id, dialed, peers = peers.len(), "input peers");
        }
        let validate = self.validate;
        let inputs: Vec<Bytes> = futures::future::try_join_all(
            entry.inputs.iter().map(|cid| self.publisher.fetch(cid, validate)),
        )
        .await?;
        cancel.checkpoint()?;

        let result = self
            .executor
            .run(candidate.body.params().clone(), inputs, cancel)
            .await?;
        let cid = self.publisher.publish(result.clone()).await?;

        let submit = LedgerAction::Submit {
            request_id: entry.id,
            request_hash: sha256_hex(entry.body.as_bytes()),
            result_hash: sha256_hex(&result),
            cid: cid.clone(),
        };
        if let Err(e) = self.push(submit).await {
            error!(request = entry.id, %cid, error = %e, "submission failed");
            return Err(e);
        }
        Ok(cid)
    }
}

pub(crate) async fn run_job<L: Ledger, S: BlobStore, B: ComputeBackend>(
    ctx: Arc<JobContext<L, S, B>>,
    candidate: Candidate,
    snapshots: watch::Receiver<Arc<LedgerSnapshot>>,
    cancel: CancelToken,
) -> JobOutcome {
    let request_id = candidate.entry.id;
    let peers = snapshots.borrow().source_peers(&candidate.entry, &ctx.account);
    let watcher = tokio::spawn(watch_competitors(
        ctx.account.clone(),
        ctx.non_compete.clone(),
        request_id,
        snapshots,
        cancel.clone(),
    ));

    let outcome = ctx.process(&candidate, &peers, cancel).await;
    watcher.abort();

    match &outcome {
        Ok(cid) => info!(request = request_id, %cid, "result submitted"),
        Err(e) => {
            if e.is_cancelled() {
                info!(request = request_id, "job cancelled, releasing claim");
            } else {
                warn!(request = request_id, error = %e, "job failed, releasing claim");
            }
            let cancel = LedgerAction::WorkCancel {
                request_id,
                reason: e.to_string(),
            };
            if let Err(e) = ctx.push(cancel).await {
                warn!(request = request_id, error = %e, "failed to release claim");
            }
        }
    }
    (request_id, outcome)
}

/// Cancel `token` once a non-compete worker shows up on the request.
async fn watch_competitors(
    account: String,
    non_compete: Arc<HashSet<String>>,
    request_id: RequestId,
    mut snapshots: watch::Receiver<Arc<LedgerSnapshot>>,
    token: CancelToken,
) {
    loop {
        let rival = {
            let snapshot = snapshots.borrow_and_update();
            snapshot
                .competitors(request_id, &account)
                .find(|w| non_compete.contains(*w))
                .map(str::to_string)
        };
        if let Some(rival) = rival {
            info!(request = request_id, %rival, "non-compete worker joined, cancelling");
            token.cancel();
            return;
        }
        if snapshots.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use swarm_core::config::StorageConfig;
    use swarm_core::{DiffuseParams, JobBody};
    use swarmgrid_compute::{ComputeError, ComputeResult};
    use swarmgrid_ledger::{ClaimStatus, LocalLedger, QueueEntry, WorkerStatus};
    use swarmgrid_storage::{MemoryBlobStore, StorageError};

    /// Echoes prompt and inputs; blocks on prompts starting with "slow".
    #[derive(Default)]
    struct Echo {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl ComputeBackend for Echo {
        type Model = ();

        fn load(&self, _model_key: &str) -> ComputeResult<()> {
            Ok(())
        }

        fn compute(
            &self,
            _model: &(),
            params: &DiffuseParams,
            inputs: &[Bytes],
            cancel: &CancelToken,
        ) -> ComputeResult<Bytes> {
            self.seen.lock().unwrap().push(params.prompt.clone());
            if params.prompt.starts_with("slow") {
                for _ in 0..1000 {
                    cancel.checkpoint()?;
                    std::thread::sleep(Duration::from_millis(5));
                }
                return Err(ComputeError::Failed("never cancelled".to_string()));
            }
            let mut out = params.prompt.to_uppercase().into_bytes();
            for input in inputs {
                out.extend_from_slice(input);
            }
            Ok(Bytes::from(out))
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            account: "me".to_string(),
            capabilities: vec!["sd-1.5".to_string()],
            non_compete: vec!["rival".to_string()],
            max_ledger_failures: 3,
            ..SchedulerConfig::default()
        }
    }

    fn publisher() -> Arc<ResultPublisher<MemoryBlobStore>> {
        let storage = StorageConfig {
            gateways: Vec::new(),
            fetch_attempts: 1,
            ..StorageConfig::default()
        };
        Arc::new(ResultPublisher::new(MemoryBlobStore::new(), &storage))
    }

    fn enqueue(ledger: &LocalLedger, prompt: &str, reward: u64, inputs: Vec<String>) -> RequestId {
        let body = JobBody::Diffuse(DiffuseParams::new("sd-1.5", prompt)).to_body().unwrap();
        ledger
            .apply(&SignedAction::new(
                "alice",
                LedgerAction::Enqueue {
                    body,
                    inputs,
                    reward,
                    min_verification: 1,
                },
            ))
            .unwrap()
            .request_id
            .unwrap()
    }

    fn scheduler(
        ledger: Arc<LocalLedger>,
        publisher: Arc<ResultPublisher<MemoryBlobStore>>,
        backend: Echo,
    ) -> QueueScheduler<LocalLedger, MemoryBlobStore, Echo> {
        QueueScheduler::new(ledger, publisher, ComputeExecutor::new(backend, 1), &config())
            .with_poll_interval(Duration::from_millis(10))
            .with_refresh_interval(Duration::from_millis(10))
    }

    async fn settled(ledger: &LocalLedger, id: RequestId) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while ledger.get_request(id).unwrap().is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    fn claimed(ledger: &LocalLedger, id: RequestId) -> Candidate {
        ledger
            .apply(&SignedAction::new("me", LedgerAction::RegWorker { url: String::new() }))
            .unwrap();
        ledger
            .apply(&SignedAction::new("me", LedgerAction::WorkBegin { request_id: id }))
            .unwrap();
        let entry: QueueEntry = ledger.get_request(id).unwrap().unwrap();
        let body = entry.job_body().unwrap();
        Candidate { entry, body }
    }

    fn context(
        ledger: Arc<LocalLedger>,
        publisher: Arc<ResultPublisher<MemoryBlobStore>>,
    ) -> Arc<JobContext<LocalLedger, MemoryBlobStore, Echo>> {
        scheduler(ledger, publisher, Echo::default()).context()
    }

    #[tokio::test]
    async fn claims_computes_and_submits() {
        let ledger = Arc::new(LocalLedger::open_in_memory().unwrap());
        let publisher = publisher();
        let input = publisher.publish(Bytes::from_static(b"+input")).await.unwrap();
        let id = enqueue(&ledger, "harbor", 10, vec![input]);

        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(scheduler(ledger.clone(), publisher.clone(), Echo::default()).run(shutdown));
        settled(&ledger, id).await;

        let solution = &ledger.solutions(id).unwrap()[0];
        assert_eq!(solution.worker, "me");
        let result = publisher.store().cat(&solution.cid).await.unwrap();
        assert_eq!(result, Bytes::from_static(b"HARBOR+input"));
        assert_eq!(solution.result_hash, sha256_hex(b"HARBOR+input"));
        let body = JobBody::Diffuse(DiffuseParams::new("sd-1.5", "harbor")).to_body().unwrap();
        assert_eq!(solution.request_hash, sha256_hex(body.as_bytes()));
        assert_eq!(ledger.balance("me").unwrap(), 10);

        stop.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn higher_reward_is_served_first() {
        let ledger = Arc::new(LocalLedger::open_in_memory().unwrap());
        let low = enqueue(&ledger, "low", 10, Vec::new());
        let high = enqueue(&ledger, "high", 30, Vec::new());

        let backend = Echo::default();
        let seen = backend.seen.clone();
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(scheduler(ledger.clone(), publisher(), backend).run(shutdown));
        settled(&ledger, high).await;
        settled(&ledger, low).await;

        assert_eq!(*seen.lock().unwrap(), vec!["high".to_string(), "low".to_string()]);
        stop.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unresolvable_input_releases_claim() {
        let ledger = Arc::new(LocalLedger::open_in_memory().unwrap());
        let id = enqueue(&ledger, "harbor", 10, vec!["QmMissing".to_string()]);
        let candidate = claimed(&ledger, id);
        let ctx = context(ledger.clone(), publisher());
        let (_tx, rx) = watch::channel(Arc::new(LedgerSnapshot::default()));

        let (request_id, outcome) = run_job(ctx, candidate, rx, CancelToken::new()).await;
        assert_eq!(request_id, id);
        assert!(matches!(
            outcome,
            Err(SchedulerError::Storage(StorageError::UnresolvableContent(cid))) if cid == "QmMissing"
        ));
        assert!(ledger.active_claims("me").unwrap().is_empty());
        assert!(ledger.get_request(id).unwrap().is_some(), "request stays open");
    }

    #[tokio::test]
    async fn non_compete_rival_cancels_inference() {
        let ledger = Arc::new(LocalLedger::open_in_memory().unwrap());
        let id = enqueue(&ledger, "slow harbor", 10, Vec::new());
        let candidate = claimed(&ledger, id);
        let ctx = context(ledger.clone(), publisher());
        let (tx, rx) = watch::channel(Arc::new(LedgerSnapshot::default()));

        let job = tokio::spawn(run_job(ctx, candidate, rx, CancelToken::new()));
        tokio::time::sleep(Duration::from_millis(30)).await;

        let mut snapshot = LedgerSnapshot::default();
        snapshot.statuses.insert(
            id,
            vec![WorkerStatus {
                worker: "rival".to_string(),
                status: ClaimStatus::Started,
                started_at: 0,
            }],
        );
        tx.send_replace(Arc::new(snapshot));

        let (_, outcome) = job.await.unwrap();
        assert!(outcome.unwrap_err().is_cancelled());
        assert!(ledger.active_claims("me").unwrap().is_empty());
    }

    #[tokio::test]
    async fn input_peers_are_dialed_once() {
        let ledger = Arc::new(LocalLedger::open_in_memory().unwrap());
        let publisher = publisher();
        ledger
            .apply(&SignedAction::new("alice", LedgerAction::RegWorker { url: "/ip4/10.0.0.1/tcp/4001".to_string() }))
            .unwrap();
        let input = publisher.publish(Bytes::from_static(b"+input")).await.unwrap();
        let first = enqueue(&ledger, "harbor", 10, vec![input.clone()]);
        let second = enqueue(&ledger, "lighthouse", 10, vec![input]);

        for id in [first, second] {
            let candidate = claimed(&ledger, id);
            let snapshot = LedgerSnapshot::fetch(&*ledger, "me").await.unwrap();
            let (_tx, rx) = watch::channel(Arc::new(snapshot));
            let ctx = context(ledger.clone(), publisher.clone());
            let (_, outcome) = run_job(ctx, candidate, rx, CancelToken::new()).await;
            outcome.unwrap();
        }
        assert_eq!(publisher.store().connect_calls(), 1);
    }

    #[tokio::test]
    async fn failed_request_is_not_reclaimed_while_cooling_down() {
        let ledger = Arc::new(LocalLedger::open_in_memory().unwrap());
        let broken = enqueue(&ledger, "broken", 30, vec!["QmMissing".to_string()]);
        let fine = enqueue(&ledger, "fine", 10, Vec::new());

        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(
            scheduler(ledger.clone(), publisher(), Echo::default())
                .with_failure_cooldown(Duration::from_secs(3600))
                .run(shutdown),
        );
        settled(&ledger, fine).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        // enqueue x2, regworker, workbegin + workcancel on the broken one,
        // workbegin + submit on the fine one.
        assert_eq!(ledger.action_count().unwrap(), 7);
        assert!(ledger.get_request(broken).unwrap().is_some());
        assert!(ledger.active_claims("me").unwrap().is_empty());
        stop.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn registers_before_claiming() {
        let ledger = Arc::new(LocalLedger::open_in_memory().unwrap());
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(
            scheduler(ledger.clone(), publisher(), Echo::default())
                .with_url("https://me.example")
                .run(shutdown),
        );
        tokio::time::timeout(Duration::from_secs(5), async {
            while ledger.list_workers().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(ledger.list_workers().unwrap()[0].url, "https://me.example");
        stop.send(true).unwrap();
        task.await.unwrap().unwrap();
    }
}
