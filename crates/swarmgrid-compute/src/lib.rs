//! swarmgrid-compute — the worker-local side of inference.
//!
//! The actual model runs behind the [`ComputeBackend`] trait. This crate
//! owns what surrounds it: a small model cache, a cancellation token the
//! backend polls, and an executor that moves blocking work off the async
//! event loop.
//!
//! ```text
//! ComputeExecutor::run(params, inputs, cancel)
//!   └── spawn_blocking
//!         ├── ModelCache::get_or_load(model)  (evicts least-used)
//!         ├── backend.compute(model, params, inputs, cancel)
//!         └── ModelCache::record_completion(model)
//! ```

pub mod cancel;
pub mod command;
pub mod error;
pub mod executor;
pub mod model_cache;

pub use cancel::CancelToken;
pub use command::{CommandBackend, CommandModel};
pub use error::{ComputeError, ComputeResult};
pub use executor::{ComputeBackend, ComputeExecutor};
pub use model_cache::{CachedModel, ModelCache};
