//! swarmd — the swarm daemon.
//!
//! One binary, one role per invocation:
//! - `hub`: relays the message bus over TCP
//! - `worker`: serves push-mode jobs from the bus
//! - `dispatch`: submits one job over the bus and writes the result
//! - `scheduler`: claims and computes jobs from the ledger
//! - `ledger`: applies one action to the ledger file (scheduler stopped)
//!
//! # Usage
//!
//! ```text
//! swarmd hub --listen 0.0.0.0:7450
//! swarmd worker --config swarm.toml
//! swarmd dispatch --config swarm.toml --params job.json --out result.png
//! swarmd scheduler --config swarm.toml
//! swarmd ledger --config swarm.toml --actor alice enqueue --params job.json --reward 10
//! ```

mod ledger_admin;
mod pull_mode;
mod push_mode;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use swarm_core::SwarmConfig;
use swarmgrid_auth::{Authenticator, Signer};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "swarmd", about = "GPU swarm daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Relay the message bus over TCP.
    Hub {
        #[arg(long, default_value = "127.0.0.1:7450")]
        listen: SocketAddr,
    },

    /// Serve push-mode jobs from the bus.
    Worker {
        #[arg(long, default_value = "swarm.toml")]
        config: PathBuf,
    },

    /// Dispatch one job over the bus and write its result.
    Dispatch {
        #[arg(long, default_value = "swarm.toml")]
        config: PathBuf,

        /// JSON file with the job parameters.
        #[arg(long)]
        params: PathBuf,

        /// Where to write the result bytes.
        #[arg(long)]
        out: PathBuf,

        /// Workers to wait for before submitting.
        #[arg(long, default_value = "1")]
        min_workers: usize,

        /// Seconds to wait for workers.
        #[arg(long, default_value = "30")]
        wait: u64,

        /// Resubmissions after a retryable failure.
        #[arg(long, default_value = "2")]
        retries: u32,
    },

    /// Claim and compute jobs from the ledger.
    Scheduler {
        #[arg(long, default_value = "swarm.toml")]
        config: PathBuf,
    },

    /// Apply one action to the ledger file. The scheduler holds the file
    /// lock while running, so stop it first.
    Ledger {
        #[arg(long, default_value = "swarm.toml")]
        config: PathBuf,

        /// Account to act as; defaults to `scheduler.account`.
        #[arg(long)]
        actor: Option<String>,

        #[command(subcommand)]
        action: ledger_admin::LedgerCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,swarmd=debug,swarmgrid=debug")),
        )
        .init();

    let cli = Cli::parse();
    let shutdown = shutdown_on_ctrl_c();

    match cli.command {
        Command::Hub { listen } => push_mode::run_hub(listen, shutdown).await,
        Command::Worker { config } => push_mode::run_worker(load_config(&config)?, shutdown).await,
        Command::Dispatch {
            config,
            params,
            out,
            min_workers,
            wait,
            retries,
        } => {
            let job = push_mode::DispatchJob {
                params,
                out,
                min_workers,
                wait: std::time::Duration::from_secs(wait),
                retries,
            };
            push_mode::run_dispatch(load_config(&config)?, job, shutdown).await
        }
        Command::Scheduler { config } => pull_mode::run_scheduler(load_config(&config)?, shutdown).await,
        Command::Ledger { config, actor, action } => {
            ledger_admin::run_ledger(&load_config(&config)?, actor.as_deref(), action).map(|_| ())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<SwarmConfig> {
    let config = SwarmConfig::from_file(path)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))?;
    info!(path = %path.display(), identity = %config.node.identity, "config loaded");
    Ok(config)
}

/// Whitelist and signing key for `identity`.
pub(crate) fn load_security(config: &SwarmConfig, identity: &str) -> anyhow::Result<(Authenticator, Option<Signer>)> {
    let auth = Authenticator::from_config(&config.security)?;
    let signer = match &config.security.key_file {
        Some(path) => Some(Signer::from_key_file(identity, path)?),
        None => None,
    };
    if auth.is_enabled() && signer.is_none() {
        warn!(%identity, "security enabled without a key file; outgoing messages are unsigned");
    }
    Ok((auth, signer))
}

/// Flips to `true` on Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for ctrl-c");
                // Dropping the sender would read as a shutdown.
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}
