//! swarmgrid-dispatch — push-mode job distribution.
//!
//! A central dispatcher assigns jobs to idle workers over the broadcast
//! bus and drives each job through its lifecycle with hard local
//! deadlines.
//!
//! # Architecture
//!
//! ```text
//! DispatcherHandle::submit(params)
//!   └── Dispatcher event loop (single owner of all state)
//!         ├── WorkerRegistry   (connection order, round-robin cursor)
//!         ├── in-flight jobs   (JobLifecycle + deadline timer)
//!         │     CREATED → SENT ──ack──▶ ACKED → COMPUTING ──result──▶ DONE
//!         │                 │ ack timeout      │ compute timeout
//!         │                 ▼                  ▼
//!         │            TIMED_OUT (evict)   TIMED_OUT (evict)
//!         │     compute-error from worker ─▶ FAILED (worker kept)
//!         ├── timers           (JoinSet, aborted on shutdown)
//!         └── heartbeats       (latency logging only)
//!
//! WorkerNode
//!   ├── hello / goodbye
//!   ├── diffuse → ack → ComputeExecutor → binary-reply | compute-error
//!   └── heartbeat → heartbeat (once per id)
//! ```

pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod job;
pub mod registry;
pub mod worker;

pub use dispatcher::{Dispatcher, DispatcherHandle, RegistryView};
pub use error::{DispatchError, DispatchResult, RegistryError, RegistryResult};
pub use heartbeat::HeartbeatTracker;
pub use job::{JobLifecycle, JobState};
pub use registry::{WorkerRegistry, WorkerSlot};
pub use worker::WorkerNode;
