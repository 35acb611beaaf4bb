//! Ledger administration: one signed action against the local ledger file.
//!
//! redb locks the file exclusively, so the scheduler using the same
//! `ledger_path` must be stopped first.

use std::path::PathBuf;

use anyhow::Context;
use clap::Subcommand;
use swarm_core::{DiffuseParams, JobBody, SwarmConfig};
use swarmgrid_ledger::{LedgerAction, LocalLedger, Receipt, SignedAction};
use tracing::info;

use crate::load_security;

#[derive(Debug, Subcommand)]
pub enum LedgerCommand {
    /// Post a request to the queue.
    Enqueue {
        /// JSON file with the job parameters.
        #[arg(long)]
        params: PathBuf,

        /// CID of an input blob; repeatable.
        #[arg(long = "input")]
        inputs: Vec<String>,

        #[arg(long)]
        reward: u64,

        /// Matching submissions needed before the request settles.
        #[arg(long, default_value = "1")]
        min_verification: u32,
    },

    /// Register the actor as a worker.
    RegWorker {
        #[arg(long, default_value = "")]
        url: String,
    },

    /// Add a GPU card to the actor's worker record.
    AddCard {
        #[arg(long)]
        card_type: String,

        #[arg(long, default_value = "")]
        info: String,
    },

    /// Enable or disable one of the actor's cards.
    ToggleCard { index: u32 },

    /// Withdraw from the actor's balance.
    Withdraw { quantity: u64 },
}

impl LedgerCommand {
    fn into_action(self) -> anyhow::Result<LedgerAction> {
        Ok(match self {
            LedgerCommand::Enqueue {
                params,
                inputs,
                reward,
                min_verification,
            } => {
                let text = std::fs::read_to_string(&params)
                    .with_context(|| format!("failed to read {}", params.display()))?;
                let params: DiffuseParams = serde_json::from_str(&text)?;
                LedgerAction::Enqueue {
                    body: JobBody::Diffuse(params).to_body()?,
                    inputs,
                    reward,
                    min_verification,
                }
            }
            LedgerCommand::RegWorker { url } => LedgerAction::RegWorker { url },
            LedgerCommand::AddCard { card_type, info } => LedgerAction::AddCard { card_type, info },
            LedgerCommand::ToggleCard { index } => LedgerAction::ToggleCard { index },
            LedgerCommand::Withdraw { quantity } => LedgerAction::Withdraw { quantity },
        })
    }
}

/// Sign `command` as `actor` (the scheduler account by default) and apply it.
pub fn run_ledger(config: &SwarmConfig, actor: Option<&str>, command: LedgerCommand) -> anyhow::Result<Receipt> {
    let actor = actor.unwrap_or(config.scheduler.account.as_str());
    let (auth, signer) = load_security(config, actor)?;
    let path = &config.scheduler.ledger_path;
    let ledger = LocalLedger::open(path)
        .with_context(|| format!("failed to open {} (is a scheduler running on it?)", path.display()))?
        .with_authenticator(auth);

    let action = command.into_action()?;
    let name = action.name();
    let signed = SignedAction::new(actor, action).signed_by(signer.as_ref())?;
    let receipt = ledger.apply(&signed)?;
    info!(%actor, action = name, seq = receipt.seq, request = ?receipt.request_id, "ledger action applied");
    Ok(receipt)
}
