//! The compute hook and the executor that keeps it off the event loop.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use swarm_core::DiffuseParams;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{ComputeError, ComputeResult};
use crate::model_cache::ModelCache;

/// Opaque inference backend.
///
/// Both methods block; the executor calls them on a dedicated thread.
pub trait ComputeBackend: Send + Sync + 'static {
    type Model: Send + Sync + 'static;

    fn load(&self, model_key: &str) -> ComputeResult<Self::Model>;

    /// Run one job. Implementations call `cancel.checkpoint()` between
    /// steps and return `ComputeError::Cancelled` when it trips.
    fn compute(
        &self,
        model: &Self::Model,
        params: &DiffuseParams,
        inputs: &[Bytes],
        cancel: &CancelToken,
    ) -> ComputeResult<Bytes>;
}

/// Runs backend calls on the blocking pool, sharing one model cache.
pub struct ComputeExecutor<B: ComputeBackend> {
    backend: Arc<B>,
    cache: Arc<Mutex<ModelCache<B::Model>>>,
}

impl<B: ComputeBackend> Clone for ComputeExecutor<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<B: ComputeBackend> ComputeExecutor<B> {
    pub fn new(backend: B, cache_capacity: usize) -> Self {
        Self {
            backend: Arc::new(backend),
            cache: Arc::new(Mutex::new(ModelCache::new(cache_capacity))),
        }
    }

    /// Compute a job; the join handle is the result hand-off.
    pub async fn run(
        &self,
        params: DiffuseParams,
        inputs: Vec<Bytes>,
        cancel: CancelToken,
    ) -> ComputeResult<Bytes> {
        cancel.checkpoint()?;
        let backend = self.backend.clone();
        let cache = self.cache.clone();

        let task = tokio::task::spawn_blocking(move || {
            let model = cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get_or_load(&params.model, |key| backend.load(key))?;

            let output = backend.compute(&model, &params, &inputs, &cancel)?;

            cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .record_completion(&params.model);
            debug!(model = %params.model, bytes = output.len(), "compute finished");
            Ok(output)
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "compute thread failed");
                Err(ComputeError::Panicked(e.to_string()))
            }
        }
    }

    /// Completed-use count of a cached model, if loaded.
    pub fn model_uses(&self, model_key: &str) -> Option<u64> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .uses(model_key)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Backend that echoes the prompt after a number of steps.
    #[derive(Default)]
    pub struct StepBackend {
        pub loads: AtomicU32,
        pub step_delay: Duration,
    }

    impl ComputeBackend for StepBackend {
        type Model = String;

        fn load(&self, model_key: &str) -> ComputeResult<String> {
            if model_key == "missing" {
                return Err(ComputeError::UnknownModel(model_key.to_string()));
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(model_key.to_string())
        }

        fn compute(
            &self,
            model: &String,
            params: &DiffuseParams,
            inputs: &[Bytes],
            cancel: &CancelToken,
        ) -> ComputeResult<Bytes> {
            for _ in 0..params.steps {
                cancel.checkpoint()?;
                std::thread::sleep(self.step_delay);
            }
            let mut out = format!("{model}:{}", params.prompt).into_bytes();
            for input in inputs {
                out.extend_from_slice(input);
            }
            Ok(Bytes::from(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StepBackend;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn computes_and_counts_uses() {
        let exec = ComputeExecutor::new(StepBackend::default(), 1);
        let mut params = DiffuseParams::new("sd-1.5", "fox");
        params.steps = 2;

        let out = exec
            .run(params.clone(), vec![Bytes::from_static(b"+in")], CancelToken::new())
            .await
            .unwrap();
        assert_eq!(out, Bytes::from_static(b"sd-1.5:fox+in"));

        exec.run(params, vec![], CancelToken::new()).await.unwrap();
        assert_eq!(exec.model_uses("sd-1.5"), Some(2));
        assert_eq!(exec.backend.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_compute() {
        let backend = StepBackend {
            step_delay: Duration::from_millis(20),
            ..Default::default()
        };
        let exec = ComputeExecutor::new(backend, 1);
        let mut params = DiffuseParams::new("sd-1.5", "slow");
        params.steps = 500;

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            trigger.cancel();
        });

        let err = exec.run(params, vec![], cancel).await.unwrap_err();
        assert!(matches!(err, ComputeError::Cancelled));
        assert_eq!(exec.model_uses("sd-1.5"), Some(0));
    }

    #[tokio::test]
    async fn unknown_model_surfaces() {
        let exec = ComputeExecutor::new(StepBackend::default(), 1);
        let err = exec
            .run(DiffuseParams::new("missing", "x"), vec![], CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ComputeError::UnknownModel(_)));
    }
}
