//! Heartbeat bookkeeping.
//!
//! Heartbeats measure round-trip latency only. Liveness is enforced by the
//! per-job timeouts, so a missing reply never evicts anyone.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

/// Outstanding heartbeats kept before the oldest are forgotten.
const MAX_PENDING: usize = 16;

#[derive(Debug, Default)]
pub struct HeartbeatTracker {
    sent: HashMap<String, Instant>,
    order: VecDeque<String>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outgoing heartbeat id.
    pub fn sent(&mut self, id: &str) {
        if self.order.len() >= MAX_PENDING {
            if let Some(oldest) = self.order.pop_front() {
                self.sent.remove(&oldest);
            }
        }
        self.sent.insert(id.to_string(), Instant::now());
        self.order.push_back(id.to_string());
    }

    /// Latency of a reply, or `None` for an id we never sent.
    ///
    /// Every replier is measured, so the entry stays until it ages out.
    pub fn reply(&self, id: &str) -> Option<Duration> {
        self.sent.get(id).map(|at| at.elapsed())
    }

    pub fn pending(&self) -> usize {
        self.sent.len()
    }
}

/// Remembers recently answered heartbeat ids so a worker replies once per
/// probe, not to other workers' replies.
#[derive(Debug, Default)]
pub struct SeenHeartbeats {
    ids: VecDeque<String>,
}

impl SeenHeartbeats {
    /// `true` the first time an id is offered.
    pub fn first_sight(&mut self, id: &str) -> bool {
        if self.ids.iter().any(|seen| seen == id) {
            return false;
        }
        if self.ids.len() >= MAX_PENDING {
            self.ids.pop_front();
        }
        self.ids.push_back(id.to_string());
        true
    }
}
