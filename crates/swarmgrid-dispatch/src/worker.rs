//! The worker side of the push protocol.
//!
//! A worker announces itself, acknowledges assignments addressed to it,
//! computes them off the event loop and replies with the result or the
//! error message. It answers each heartbeat once and says goodbye when it
//! shuts down.

use bytes::Bytes;
use swarm_core::JobId;
use swarmgrid_auth::{Authenticator, Signer};
use swarmgrid_bus::{BusPort, BusSender, Envelope, Frame, Method, epoch_secs_f64};
use swarmgrid_compute::{CancelToken, ComputeBackend, ComputeError, ComputeExecutor};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::heartbeat::SeenHeartbeats;

pub struct WorkerNode<B: ComputeBackend> {
    identity: String,
    port: BusPort,
    executor: ComputeExecutor<B>,
    capabilities: Vec<String>,
    auth: Authenticator,
    signer: Option<Signer>,
}

impl<B: ComputeBackend> WorkerNode<B> {
    pub fn new(identity: &str, port: BusPort, executor: ComputeExecutor<B>) -> Self {
        Self {
            identity: identity.to_string(),
            port,
            executor,
            capabilities: Vec::new(),
            auth: Authenticator::disabled(),
            signer: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_authenticator(mut self, auth: Authenticator) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let WorkerNode {
            identity,
            port,
            executor,
            capabilities,
            auth,
            signer,
        } = self;
        let (sender, mut receiver) = port.split();
        let out = Outbox {
            identity: identity.clone(),
            sender,
            signer,
        };

        out.emit(Envelope::new(&identity, Method::Hello { capabilities }).into()).await;
        info!(%identity, "worker joined bus");

        let mut jobs: JoinSet<(JobId, Result<Bytes, ComputeError>)> = JoinSet::new();
        let cancel_all = CancelToken::new();
        let mut seen = SeenHeartbeats::default();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                frame = receiver.recv() => {
                    let Some(frame) = frame else {
                        warn!("bus closed, worker stopping");
                        break;
                    };
                    let envelope = frame.envelope;
                    if let Err(e) = envelope.authenticate(&auth) {
                        warn!(sender = %envelope.sender, error = %e, "dropping unauthenticated message");
                        continue;
                    }
                    match envelope.method {
                        Method::Diffuse { worker, params } if worker == identity => {
                            out.emit(Envelope::reply(&envelope.id, &identity, Method::Ack).into()).await;
                            info!(job = %envelope.id, model = %params.model, "job accepted");
                            let executor = executor.clone();
                            let cancel = cancel_all.child();
                            let job_id = envelope.id;
                            jobs.spawn(async move {
                                let result = executor.run(params, Vec::new(), cancel).await;
                                (job_id, result)
                            });
                        }
                        Method::Heartbeat { .. } if seen.first_sight(&envelope.id) => {
                            out.emit(
                                Envelope::reply(&envelope.id, &identity, Method::Heartbeat { ts: epoch_secs_f64() }).into(),
                            )
                            .await;
                        }
                        _ => {}
                    }
                }
                Some(finished) = jobs.join_next() => match finished {
                    Ok((job_id, Ok(result))) => {
                        info!(job = %job_id, bytes = result.len(), "job finished");
                        out.emit(Frame::binary_reply(&job_id, &identity, result)).await;
                    }
                    Ok((job_id, Err(e))) => {
                        warn!(job = %job_id, error = %e, "job failed");
                        let reply = Method::ComputeError { message: e.to_string() };
                        out.emit(Envelope::reply(&job_id, &identity, reply).into()).await;
                    }
                    Err(e) => warn!(error = %e, "job task failed"),
                },
            }
        }

        cancel_all.cancel();
        jobs.abort_all();
        out.emit(Envelope::new(&identity, Method::Goodbye).into()).await;
        info!(%identity, "worker left bus");
    }
}

struct Outbox {
    identity: String,
    sender: BusSender,
    signer: Option<Signer>,
}

impl Outbox {
    async fn emit(&self, frame: Frame) {
        let method = frame.envelope.method.name();
        let frame = match frame.signed_by(self.signer.as_ref()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(identity = %self.identity, method, error = %e, "failed to sign message");
                return;
            }
        };
        match self.sender.send(frame).await {
            Ok(()) => debug!(identity = %self.identity, method, "sent"),
            Err(e) => warn!(identity = %self.identity, method, error = %e, "failed to send"),
        }
    }
}
