//! Choosing which queued request to claim next.
//!
//! Filters run in a fixed order and the first one that matches decides
//! the skip reason. Survivors are shuffled, then stable-sorted by reward
//! so equal rewards come out in random order.

use std::collections::HashSet;

use rand::Rng;
use rand::seq::SliceRandom;
use swarm_core::JobBody;
use swarm_core::config::SchedulerConfig;
use swarmgrid_ledger::QueueEntry;
use tracing::debug;

use crate::snapshot::LedgerSnapshot;

/// This worker's selection rules.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    pub account: String,
    /// Model keys this worker can serve.
    pub capabilities: HashSet<String>,
    /// Empty means every supported model is allowed.
    pub allow_list: HashSet<String>,
    pub deny_list: HashSet<String>,
    pub non_compete: HashSet<String>,
    pub max_concurrent: usize,
}

impl CandidateFilter {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            account: config.account.clone(),
            capabilities: config.capabilities.iter().cloned().collect(),
            allow_list: config.allow_list.iter().cloned().collect(),
            deny_list: config.deny_list.iter().cloned().collect(),
            non_compete: config.non_compete.iter().cloned().collect(),
            max_concurrent: config.max_concurrent,
        }
    }

    /// Decode and vet one entry.
    pub fn check(&self, entry: &QueueEntry, snapshot: &LedgerSnapshot) -> Result<JobBody, Skip> {
        let body = entry.job_body().map_err(|_| Skip::Malformed)?;
        let model = body.model();
        if !self.capabilities.contains(model) {
            return Err(Skip::Unsupported(model.to_string()));
        }
        if !self.allow_list.is_empty() && !self.allow_list.contains(model) {
            return Err(Skip::NotAllowed(model.to_string()));
        }
        if self.deny_list.contains(model) {
            return Err(Skip::Denied(model.to_string()));
        }
        if snapshot.claimed_by(entry.id, &self.account) {
            return Err(Skip::AlreadyClaimed);
        }
        let competitors: Vec<&str> = snapshot.competitors(entry.id, &self.account).collect();
        if let Some(rival) = competitors.iter().find(|w| self.non_compete.contains(**w)) {
            return Err(Skip::NonCompete(rival.to_string()));
        }
        if competitors.len() > self.max_concurrent {
            return Err(Skip::Crowded(competitors.len()));
        }
        Ok(body)
    }
}

/// Why a request was passed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    Malformed,
    Unsupported(String),
    NotAllowed(String),
    Denied(String),
    AlreadyClaimed,
    NonCompete(String),
    Crowded(usize),
}

/// A request that passed every filter.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: QueueEntry,
    pub body: JobBody,
}

/// Eligible requests, best first.
pub fn select_candidates<R: Rng + ?Sized>(
    snapshot: &LedgerSnapshot,
    filter: &CandidateFilter,
    rng: &mut R,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = snapshot
        .queue
        .iter()
        .filter_map(|entry| match filter.check(entry, snapshot) {
            Ok(body) => Some(Candidate {
                entry: entry.clone(),
                body,
            }),
            Err(skip) => {
                debug!(request = entry.id, reason = ?skip, "skipping request");
                None
            }
        })
        .collect();
    candidates.shuffle(rng);
    candidates.sort_by(|a, b| b.entry.reward.cmp(&a.entry.reward));
    candidates
}
