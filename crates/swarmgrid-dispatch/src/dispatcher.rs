//! Push-mode job dispatcher.
//!
//! A single event loop owns the worker registry and the in-flight table.
//! Callers reach it through a cloneable [`DispatcherHandle`]; every bus
//! frame, timer expiry and command is handled on the loop, so no state is
//! shared across tasks.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use swarm_core::config::DispatcherConfig;
use swarm_core::{DiffuseParams, JobId, WorkerId};
use swarmgrid_auth::{Authenticator, Signer};
use swarmgrid_bus::{BusPort, BusReceiver, BusSender, Envelope, Frame, Method, epoch_secs_f64};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::heartbeat::HeartbeatTracker;
use crate::job::{JobLifecycle, JobState};
use crate::registry::WorkerRegistry;

const COMMAND_BUFFER: usize = 64;

/// Which deadline a timer guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ack,
    Compute,
}

#[derive(Debug)]
struct Expiry {
    job_id: JobId,
    phase: Phase,
}

struct InFlight {
    worker: WorkerId,
    lifecycle: JobLifecycle,
    timer: AbortHandle,
    submitted_at: Instant,
    reply: oneshot::Sender<DispatchResult<Bytes>>,
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryView {
    pub workers: Vec<WorkerId>,
    pub cursor: usize,
    pub idle: usize,
}

enum Command {
    Submit {
        params: DiffuseParams,
        reply: oneshot::Sender<DispatchResult<Bytes>>,
    },
    Registry {
        reply: oneshot::Sender<RegistryView>,
    },
}

/// Cloneable entry point to a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    commands: mpsc::Sender<Command>,
}

impl DispatcherHandle {
    /// Dispatch one job and wait for its outcome.
    pub async fn submit(&self, params: DiffuseParams) -> DispatchResult<Bytes> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit { params, reply })
            .await
            .map_err(|_| DispatchError::Shutdown)?;
        rx.await.map_err(|_| DispatchError::Shutdown)?
    }

    pub async fn registry(&self) -> DispatchResult<RegistryView> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Registry { reply })
            .await
            .map_err(|_| DispatchError::Shutdown)?;
        rx.await.map_err(|_| DispatchError::Shutdown)
    }

    pub async fn workers(&self) -> DispatchResult<Vec<WorkerId>> {
        Ok(self.registry().await?.workers)
    }

    /// Poll until at least `count` workers are registered.
    pub async fn wait_for_workers(&self, count: usize, poll: Duration) -> DispatchResult<Vec<WorkerId>> {
        loop {
            let workers = self.workers().await?;
            if workers.len() >= count {
                return Ok(workers);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

pub struct Dispatcher {
    identity: String,
    sender: BusSender,
    receiver: BusReceiver,
    commands: mpsc::Receiver<Command>,
    registry: WorkerRegistry,
    inflight: HashMap<JobId, InFlight>,
    timers: JoinSet<Expiry>,
    heartbeats: HeartbeatTracker,
    auth: Authenticator,
    signer: Option<Signer>,
    ack_timeout: Duration,
    compute_timeout: Duration,
    heartbeat_interval: Duration,
}

impl Dispatcher {
    pub fn new(identity: &str, port: BusPort, config: &DispatcherConfig) -> (Self, DispatcherHandle) {
        let (sender, receiver) = port.split();
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let dispatcher = Self {
            identity: identity.to_string(),
            sender,
            receiver,
            commands: rx,
            registry: WorkerRegistry::new(),
            inflight: HashMap::new(),
            timers: JoinSet::new(),
            heartbeats: HeartbeatTracker::new(),
            auth: Authenticator::disabled(),
            signer: None,
            ack_timeout: config.ack_timeout(),
            compute_timeout: config.compute_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
        };
        (dispatcher, DispatcherHandle { commands: tx })
    }

    pub fn with_authenticator(mut self, auth: Authenticator) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_compute_timeout(mut self, timeout: Duration) -> Self {
        self.compute_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Run until shutdown or until the bus closes.
    ///
    /// Jobs still in flight at exit fail with [`DispatchError::Shutdown`].
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            identity = %self.identity,
            ack_timeout = ?self.ack_timeout,
            compute_timeout = ?self.compute_timeout,
            "dispatcher started"
        );
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("dispatcher shutting down");
                    break;
                }
                Some(command) = self.commands.recv() => self.on_command(command).await,
                frame = self.receiver.recv() => match frame {
                    Some(frame) => self.on_frame(frame),
                    None => {
                        warn!("bus closed, dispatcher stopping");
                        break;
                    }
                },
                Some(expired) = self.timers.join_next() => {
                    if let Ok(expiry) = expired {
                        self.on_expiry(expiry);
                    }
                }
                _ = heartbeat.tick() => self.send_heartbeat().await,
            }
        }

        self.timers.abort_all();
        for (job_id, job) in self.inflight.drain() {
            debug!(job = %job_id, "failing in-flight job on shutdown");
            let _ = job.reply.send(Err(DispatchError::Shutdown));
        }
    }

    // ── Commands ───────────────────────────────────────────────────

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Submit { params, reply } => self.dispatch(params, reply).await,
            Command::Registry { reply } => {
                let _ = reply.send(RegistryView {
                    workers: self.registry.ids(),
                    cursor: self.registry.cursor(),
                    idle: self.registry.idle_count(),
                });
            }
        }
    }

    async fn dispatch(&mut self, params: DiffuseParams, reply: oneshot::Sender<DispatchResult<Bytes>>) {
        let job_id = uuid::Uuid::new_v4().to_string();
        let worker = match self.registry.next_idle_worker() {
            Ok(worker) => worker,
            Err(e) => {
                debug!(error = %e, "cannot dispatch");
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        if let Err(e) = self.registry.set_busy(&worker, &job_id) {
            let _ = reply.send(Err(e.into()));
            return;
        }

        let assignment = Envelope::reply(
            &job_id,
            &self.identity,
            Method::Diffuse {
                worker: worker.clone(),
                params,
            },
        );
        if let Err(e) = self.publish(assignment.into()).await {
            warn!(job = %job_id, %worker, error = %e, "failed to send assignment");
            self.registry.clear_busy(&worker);
            let _ = reply.send(Err(e));
            return;
        }

        let mut lifecycle = JobLifecycle::new();
        advance(&mut lifecycle, &job_id, JobState::Sent);
        let timer = arm(&mut self.timers, &job_id, Phase::Ack, self.ack_timeout);
        info!(job = %job_id, %worker, "job sent");
        self.inflight.insert(
            job_id,
            InFlight {
                worker,
                lifecycle,
                timer,
                submitted_at: Instant::now(),
                reply,
            },
        );
    }

    // ── Bus traffic ────────────────────────────────────────────────

    fn on_frame(&mut self, frame: Frame) {
        if let Err(e) = frame.envelope.authenticate(&self.auth) {
            warn!(
                sender = %frame.envelope.sender,
                method = frame.envelope.method.name(),
                error = %e,
                "dropping unauthenticated message"
            );
            return;
        }
        if let Err(e) = frame.verify_payload() {
            warn!(job = %frame.envelope.id, sender = %frame.envelope.sender, error = %e, "dropping tampered result");
            return;
        }
        let Frame { envelope, payload } = frame;

        let Envelope { id, sender, method, .. } = envelope;
        match method {
            Method::Hello { capabilities } => {
                self.registry.connect_with(&sender, capabilities);
            }
            Method::Goodbye => self.on_goodbye(&sender),
            Method::Ack => self.on_ack(&id, &sender),
            Method::BinaryReply { .. } => {
                if let Some(payload) = payload {
                    self.on_result(&id, &sender, payload);
                }
            }
            Method::ComputeError { message } => self.on_compute_error(&id, &sender, message),
            Method::Heartbeat { .. } => self.on_heartbeat_reply(&id, &sender),
            Method::Diffuse { .. } => {}
        }
    }

    fn on_ack(&mut self, job_id: &str, sender: &str) {
        let Some(job) = self.inflight.get_mut(job_id) else {
            debug!(job = %job_id, worker = %sender, "ack for unknown job");
            return;
        };
        if job.worker != sender {
            warn!(job = %job_id, worker = %sender, assigned = %job.worker, "ack from wrong worker");
            return;
        }
        if job.lifecycle.state() != JobState::Sent {
            debug!(job = %job_id, state = %job.lifecycle.state(), "duplicate ack");
            return;
        }
        job.timer.abort();
        advance(&mut job.lifecycle, job_id, JobState::Acked);
        advance(&mut job.lifecycle, job_id, JobState::Computing);
        job.timer = arm(&mut self.timers, job_id, Phase::Compute, self.compute_timeout);
        debug!(job = %job_id, worker = %sender, "job acknowledged");
    }

    fn on_result(&mut self, job_id: &str, sender: &str, payload: Bytes) {
        let Some(mut job) = self.take_job_from(job_id, sender) else {
            return;
        };
        advance(&mut job.lifecycle, job_id, JobState::Done);
        self.registry.clear_busy(sender);
        info!(
            job = %job_id,
            worker = %sender,
            bytes = payload.len(),
            elapsed_ms = job.submitted_at.elapsed().as_millis() as u64,
            "job done"
        );
        let _ = job.reply.send(Ok(payload));
    }

    fn on_compute_error(&mut self, job_id: &str, sender: &str, message: String) {
        let Some(mut job) = self.take_job_from(job_id, sender) else {
            return;
        };
        advance(&mut job.lifecycle, job_id, JobState::Failed);
        self.registry.clear_busy(sender);
        warn!(job = %job_id, worker = %sender, error = %message, "job failed");
        let _ = job.reply.send(Err(DispatchError::ComputeError(message)));
    }

    /// Remove a job if `sender` is its worker; late or foreign replies stay
    /// where they are.
    fn take_job_from(&mut self, job_id: &str, sender: &str) -> Option<InFlight> {
        match self.inflight.get(job_id) {
            Some(job) if job.worker == sender => {}
            Some(job) => {
                warn!(job = %job_id, worker = %sender, assigned = %job.worker, "reply from wrong worker");
                return None;
            }
            None => {
                debug!(job = %job_id, worker = %sender, "late reply dropped");
                return None;
            }
        }
        let job = self.inflight.remove(job_id)?;
        job.timer.abort();
        Some(job)
    }

    fn on_goodbye(&mut self, sender: &str) {
        let Some(slot) = self.registry.disconnect(sender) else {
            return;
        };
        if let Some(job_id) = slot.busy {
            if let Some(mut job) = self.inflight.remove(&job_id) {
                job.timer.abort();
                advance(&mut job.lifecycle, &job_id, JobState::Failed);
                warn!(job = %job_id, worker = %sender, "worker left mid-job");
                let _ = job.reply.send(Err(DispatchError::WorkerOffline(sender.to_string())));
            }
        }
    }

    fn on_heartbeat_reply(&mut self, id: &str, sender: &str) {
        let Some(latency) = self.heartbeats.reply(id) else {
            return;
        };
        debug!(worker = %sender, latency_ms = latency.as_millis() as u64, "heartbeat reply");
        if !self.registry.contains(sender) {
            info!(worker = %sender, "worker discovered by heartbeat");
            self.registry.connect(sender);
        }
    }

    // ── Timers ─────────────────────────────────────────────────────

    fn on_expiry(&mut self, expiry: Expiry) {
        let Expiry { job_id, phase } = expiry;
        let expected = match phase {
            Phase::Ack => JobState::Sent,
            Phase::Compute => JobState::Computing,
        };
        match self.inflight.get(&job_id) {
            Some(job) if job.lifecycle.state() == expected => {}
            _ => return,
        }
        let Some(mut job) = self.inflight.remove(&job_id) else {
            return;
        };
        advance(&mut job.lifecycle, &job_id, JobState::TimedOut);
        self.registry.disconnect(&job.worker);

        let error = match phase {
            Phase::Ack => {
                warn!(job = %job_id, worker = %job.worker, "no ack in time, evicting worker");
                DispatchError::WorkerOffline(job.worker.clone())
            }
            Phase::Compute => {
                warn!(job = %job_id, worker = %job.worker, "compute timed out, evicting worker");
                DispatchError::ComputeTimeout(job.worker.clone())
            }
        };
        let _ = job.reply.send(Err(error));
    }

    async fn send_heartbeat(&mut self) {
        let probe = Envelope::new(&self.identity, Method::Heartbeat { ts: epoch_secs_f64() });
        self.heartbeats.sent(&probe.id);
        if let Err(e) = self.publish(probe.into()).await {
            warn!(error = %e, "failed to send heartbeat");
        }
    }

    async fn publish(&self, frame: Frame) -> DispatchResult<()> {
        let frame = frame.signed_by(self.signer.as_ref())?;
        self.sender.send(frame).await?;
        Ok(())
    }
}

fn arm(timers: &mut JoinSet<Expiry>, job_id: &str, phase: Phase, after: Duration) -> AbortHandle {
    let job_id = job_id.to_string();
    timers.spawn(async move {
        tokio::time::sleep(after).await;
        Expiry { job_id, phase }
    })
}

fn advance(lifecycle: &mut JobLifecycle, job_id: &str, next: JobState) {
    let from = lifecycle.state();
    match lifecycle.advance(next) {
        Ok(()) => debug!(job = %job_id, %from, to = %next, "job state"),
        Err(e) => warn!(job = %job_id, from = %e.from, to = %e.to, "invalid job transition"),
    }
}
