//! Worker registry with a round-robin cursor.
//!
//! Workers are kept in connection order. The cursor is the index the next
//! idle-worker scan starts from; it persists across calls so load spreads
//! evenly, and it is kept within bounds as workers come and go.

use std::time::Instant;

use swarm_core::{JobId, WorkerId};
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};

/// A connected worker.
#[derive(Debug, Clone)]
pub struct WorkerSlot {
    pub id: WorkerId,
    pub busy: Option<JobId>,
    pub capabilities: Vec<String>,
    pub joined_at: Instant,
}

impl WorkerSlot {
    pub fn is_idle(&self) -> bool {
        self.busy.is_none()
    }
}

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Vec<WorkerSlot>,
    cursor: usize,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Returns `false` if it was already present.
    pub fn connect(&mut self, id: &str) -> bool {
        self.connect_with(id, Vec::new())
    }

    pub fn connect_with(&mut self, id: &str, capabilities: Vec<String>) -> bool {
        if let Some(slot) = self.workers.iter_mut().find(|w| w.id == id) {
            slot.capabilities = capabilities;
            return false;
        }
        self.workers.push(WorkerSlot {
            id: id.to_string(),
            busy: None,
            capabilities,
            joined_at: Instant::now(),
        });
        info!(worker = %id, workers = self.workers.len(), "worker connected");
        true
    }

    /// Remove a worker, returning its slot if it was present.
    pub fn disconnect(&mut self, id: &str) -> Option<WorkerSlot> {
        let idx = self.workers.iter().position(|w| w.id == id)?;
        let slot = self.workers.remove(idx);
        if idx <= self.cursor {
            self.cursor = self.cursor.saturating_sub(1);
        }
        self.clamp_cursor();
        info!(worker = %id, workers = self.workers.len(), "worker disconnected");
        Some(slot)
    }

    pub fn set_busy(&mut self, id: &str, job: &str) -> RegistryResult<()> {
        let slot = self
            .workers
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| RegistryError::UnknownWorker(id.to_string()))?;
        if let Some(current) = &slot.busy {
            return Err(RegistryError::WorkerBusy {
                worker: id.to_string(),
                job: current.clone(),
            });
        }
        slot.busy = Some(job.to_string());
        debug!(worker = %id, %job, "worker busy");
        Ok(())
    }

    /// Mark a worker idle, returning the job it was holding.
    pub fn clear_busy(&mut self, id: &str) -> Option<JobId> {
        let slot = self.workers.iter_mut().find(|w| w.id == id)?;
        let job = slot.busy.take();
        if job.is_some() {
            debug!(worker = %id, "worker idle");
        }
        job
    }

    /// First idle worker at or after the cursor, wrapping around.
    pub fn next_idle_worker(&mut self) -> RegistryResult<WorkerId> {
        if self.workers.is_empty() {
            return Err(RegistryError::NoWorkersAvailable);
        }
        self.clamp_cursor();
        let len = self.workers.len();
        for offset in 0..len {
            let idx = (self.cursor + offset) % len;
            if self.workers[idx].is_idle() {
                self.cursor = (idx + 1) % len;
                return Ok(self.workers[idx].id.clone());
            }
        }
        Err(RegistryError::AllWorkersBusy)
    }

    fn clamp_cursor(&mut self) {
        if self.cursor >= self.workers.len() {
            self.cursor = 0;
        }
    }

    pub fn get(&self, id: &str) -> Option<&WorkerSlot> {
        self.workers.iter().find(|w| w.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Worker ids in connection order.
    pub fn ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|w| w.id.clone()).collect()
    }

    pub fn idle_count(&self) -> usize {
        self.workers.iter().filter(|w| w.is_idle()).count()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
