//! Pull mode: the ledger scheduler.

use std::sync::Arc;

use anyhow::anyhow;
use swarm_core::SwarmConfig;
use swarmgrid_compute::{CommandBackend, ComputeExecutor};
use swarmgrid_ledger::LocalLedger;
use swarmgrid_scheduler::QueueScheduler;
use swarmgrid_storage::{IpfsHttpStore, ResultPublisher};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::load_security;

pub async fn run_scheduler(config: SwarmConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let command = config
        .compute
        .command
        .clone()
        .ok_or_else(|| anyhow!("compute.command is required in scheduler mode"))?;
    let account = config.scheduler.account.clone();
    let (auth, signer) = load_security(&config, &account)?;

    if let Some(dir) = config.scheduler.ledger_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let ledger = LocalLedger::open(&config.scheduler.ledger_path)?.with_authenticator(auth);
    info!(path = %config.scheduler.ledger_path.display(), "ledger opened");

    let publisher = ResultPublisher::new(IpfsHttpStore::new(&config.storage.api_url), &config.storage);
    match publisher.refresh_peers().await {
        Ok(peers) => info!(peers, "blob store reachable"),
        Err(e) => warn!(api = %config.storage.api_url, error = %e, "blob store unreachable, continuing"),
    }

    if config.scheduler.capabilities.is_empty() {
        warn!("no capabilities configured; every request will be skipped");
    }
    let executor = ComputeExecutor::new(CommandBackend::new(command), config.compute.model_cache_capacity);
    let mut scheduler = QueueScheduler::new(Arc::new(ledger), Arc::new(publisher), executor, &config.scheduler);
    if let Some(signer) = signer {
        scheduler = scheduler.with_signer(signer);
    }
    scheduler.run(shutdown).await?;
    Ok(())
}
