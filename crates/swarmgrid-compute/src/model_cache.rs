//! Bounded cache of loaded model handles.
//!
//! Eviction picks the entry with the fewest completed jobs; ties go to the
//! entry loaded first. Capacity is expected to be tiny (one or two models)
//! because each handle pins scarce GPU memory.

use std::sync::Arc;

use tracing::{debug, info};

/// A loaded model and how many jobs it has completed.
#[derive(Debug)]
pub struct CachedModel<M> {
    pub model_key: String,
    pub handle: Arc<M>,
    pub uses_completed: u64,
}

#[derive(Debug)]
pub struct ModelCache<M> {
    capacity: usize,
    entries: Vec<CachedModel<M>>,
}

impl<M> ModelCache<M> {
    /// A cache holding at most `capacity` models (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Vec::new(),
        }
    }

    /// Return the cached handle or load it, evicting first when full.
    pub fn get_or_load<E>(
        &mut self,
        model_key: &str,
        loader: impl FnOnce(&str) -> Result<M, E>,
    ) -> Result<Arc<M>, E> {
        if let Some(entry) = self.entries.iter().find(|e| e.model_key == model_key) {
            return Ok(entry.handle.clone());
        }

        if self.entries.len() >= self.capacity {
            self.evict_one();
        }

        info!(model = %model_key, "loading model");
        let handle = Arc::new(loader(model_key)?);
        self.entries.push(CachedModel {
            model_key: model_key.to_string(),
            handle: handle.clone(),
            uses_completed: 0,
        });
        Ok(handle)
    }

    /// Count one finished job against a model.
    pub fn record_completion(&mut self, model_key: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.model_key == model_key) {
            entry.uses_completed += 1;
        }
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(idx, e)| (e.uses_completed, *idx))
            .map(|(idx, _)| idx);
        if let Some(idx) = victim {
            let evicted = self.entries.remove(idx);
            debug!(
                model = %evicted.model_key,
                uses = evicted.uses_completed,
                "evicting model"
            );
        }
    }

    pub fn contains(&self, model_key: &str) -> bool {
        self.entries.iter().any(|e| e.model_key == model_key)
    }

    pub fn uses(&self, model_key: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.model_key == model_key)
            .map(|e| e.uses_completed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
