//! Push mode: bus hub, worker node and one-shot dispatcher.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use swarm_core::{DiffuseParams, SwarmConfig};
use swarmgrid_bus::Hub;
use swarmgrid_compute::{CommandBackend, ComputeExecutor};
use swarmgrid_dispatch::{Dispatcher, WorkerNode};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::load_security;

pub async fn run_hub(listen: SocketAddr, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!(%listen, "bus hub listening");
    swarmgrid_bus::serve(listener, Hub::new(), shutdown).await?;
    info!("bus hub stopped");
    Ok(())
}

pub async fn run_worker(config: SwarmConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let command = config
        .compute
        .command
        .clone()
        .ok_or_else(|| anyhow!("compute.command is required in worker mode"))?;
    let identity = config.node.identity.clone();
    let (auth, signer) = load_security(&config, &identity)?;

    let port = swarmgrid_bus::connect(config.node.bus_addr.as_str())
        .await
        .with_context(|| format!("failed to reach bus at {}", config.node.bus_addr))?;
    let executor = ComputeExecutor::new(CommandBackend::new(command), config.compute.model_cache_capacity);

    let mut node = WorkerNode::new(&identity, port, executor)
        .with_capabilities(config.scheduler.capabilities.clone())
        .with_authenticator(auth);
    if let Some(signer) = signer {
        node = node.with_signer(signer);
    }
    info!(%identity, bus = %config.node.bus_addr, "worker starting");
    node.run(shutdown).await;
    Ok(())
}

pub struct DispatchJob {
    pub params: PathBuf,
    pub out: PathBuf,
    pub min_workers: usize,
    pub wait: Duration,
    pub retries: u32,
}

pub async fn run_dispatch(
    config: SwarmConfig,
    job: DispatchJob,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&job.params)
        .with_context(|| format!("failed to read {}", job.params.display()))?;
    let params: DiffuseParams = serde_json::from_str(&text)?;

    let identity = config.node.identity.clone();
    let (auth, signer) = load_security(&config, &identity)?;
    let port = swarmgrid_bus::connect(config.node.bus_addr.as_str())
        .await
        .with_context(|| format!("failed to reach bus at {}", config.node.bus_addr))?;

    let (mut dispatcher, handle) = Dispatcher::new(&identity, port, &config.dispatcher);
    dispatcher = dispatcher.with_authenticator(auth);
    if let Some(signer) = signer {
        dispatcher = dispatcher.with_signer(signer);
    }
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(dispatcher.run(stop_rx));

    let work = async {
        let workers = tokio::time::timeout(job.wait, handle.wait_for_workers(job.min_workers, Duration::from_millis(100)))
            .await
            .map_err(|_| anyhow!("fewer than {} workers joined within {:?}", job.min_workers, job.wait))??;
        info!(workers = workers.len(), model = %params.model, "submitting job");

        let mut attempt = 0;
        let result = loop {
            match handle.submit(params.clone()).await {
                Ok(result) => break result,
                Err(e) if e.is_retryable() && attempt < job.retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "job failed, resubmitting");
                }
                Err(e) => return Err(e.into()),
            }
        };
        Ok::<_, anyhow::Error>(result)
    };

    let outcome = tokio::select! {
        _ = shutdown.changed() => Err(anyhow!("interrupted")),
        result = work => result,
    };

    let _ = stop_tx.send(true);
    let _ = task.await;

    let result = outcome?;
    std::fs::write(&job.out, &result).with_context(|| format!("failed to write {}", job.out.display()))?;
    info!(out = %job.out.display(), bytes = result.len(), "result written");
    Ok(())
}
