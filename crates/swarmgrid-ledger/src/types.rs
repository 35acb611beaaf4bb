//! Records and actions of the job ledger.
//!
//! Requests, claims and worker records are what the scheduler reads. Every
//! change goes through a [`SignedAction`].

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use swarm_core::{JobBody, JobId};
use swarmgrid_auth::{Auth, AuthResult, Authenticator, Signer};

/// Ledger-assigned request number.
pub type RequestId = u64;

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// ── Queue ──────────────────────────────────────────────────────────

/// An open request on the job board.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub id: RequestId,
    pub requester: String,
    /// Encoded [`JobBody`]; may be malformed, the ledger does not check.
    pub body: String,
    /// CIDs of input blobs.
    pub inputs: Vec<String>,
    pub reward: u64,
    /// Submissions needed before the request is settled.
    pub min_verification: u32,
    pub created_at: u64,
}

impl QueueEntry {
    pub fn job_body(&self) -> serde_json::Result<JobBody> {
        JobBody::parse(&self.body)
    }

    pub fn job_id(&self) -> JobId {
        self.id.to_string()
    }
}

// ── Claims ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Started,
    Solved,
}

/// One worker's claim on a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerStatus {
    pub worker: String,
    pub status: ClaimStatus,
    pub started_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Solution {
    pub worker: String,
    pub request_hash: String,
    pub result_hash: String,
    pub cid: String,
    pub submitted_at: u64,
}

// ── Workers ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpuCard {
    pub index: u32,
    pub card_type: String,
    pub info: String,
    pub enabled: bool,
}

/// A registered worker account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRecord {
    pub account: String,
    pub url: String,
    pub cards: Vec<GpuCard>,
    pub joined_at: u64,
}

// ── Actions ────────────────────────────────────────────────────────

/// A state change submitted to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", content = "data", rename_all = "lowercase")]
pub enum LedgerAction {
    Enqueue {
        body: String,
        inputs: Vec<String>,
        reward: u64,
        min_verification: u32,
    },
    WorkBegin {
        request_id: RequestId,
    },
    Submit {
        request_id: RequestId,
        request_hash: String,
        result_hash: String,
        cid: String,
    },
    WorkCancel {
        request_id: RequestId,
        reason: String,
    },
    RegWorker {
        url: String,
    },
    AddCard {
        card_type: String,
        info: String,
    },
    ToggleCard {
        index: u32,
    },
    Withdraw {
        quantity: u64,
    },
}

impl LedgerAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enqueue { .. } => "enqueue",
            Self::WorkBegin { .. } => "workbegin",
            Self::Submit { .. } => "submit",
            Self::WorkCancel { .. } => "workcancel",
            Self::RegWorker { .. } => "regworker",
            Self::AddCard { .. } => "addcard",
            Self::ToggleCard { .. } => "togglecard",
            Self::Withdraw { .. } => "withdraw",
        }
    }
}

/// An action with its author and optional signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignedAction {
    pub actor: String,
    #[serde(flatten)]
    pub action: LedgerAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

impl SignedAction {
    pub fn new(actor: &str, action: LedgerAction) -> Self {
        Self {
            actor: actor.to_string(),
            action,
            auth: None,
        }
    }

    pub fn signed(mut self, signer: &Signer) -> AuthResult<Self> {
        self.auth = None;
        self.auth = Some(signer.sign(&self)?);
        Ok(self)
    }

    /// Sign when a signer is configured, pass through otherwise.
    pub fn signed_by(self, signer: Option<&Signer>) -> AuthResult<Self> {
        match signer {
            Some(signer) => self.signed(signer),
            None => Ok(self),
        }
    }

    pub fn authenticate(&self, auth: &Authenticator) -> AuthResult<String> {
        auth.check(self, &self.actor, self.auth.as_ref())
    }
}

/// What the ledger hands back for an applied action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    /// Position in the action log.
    pub seq: u64,
    /// Set for `enqueue`.
    pub request_id: Option<RequestId>,
}
