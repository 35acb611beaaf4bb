//! swarmgrid-scheduler — pull-mode work selection.
//!
//! Workers poll the ledger, pick the best request they may take and race
//! other workers to claim it. The ledger settles the race; a lost claim is
//! simply dropped.
//!
//! # Architecture
//!
//! ```text
//! Refresher ──(every refresh_interval)──▶ watch<LedgerSnapshot>
//!                                              │
//! QueueScheduler loop (every poll_interval)    │
//!   ├── select_candidates(snapshot, filter) ◀──┤
//!   │     malformed → capability → allow → deny → own claim
//!   │     → non-compete → max_concurrent; shuffle; sort by reward
//!   ├── workbegin (signed)
//!   └── JoinSet of jobs (≤ max_inflight)
//!         ├── fetch inputs (ResultPublisher, mirrors raced)
//!         ├── compute (ComputeExecutor, cancelled by competitor watcher)
//!         ├── publish result
//!         └── submit(request_hash, result_hash, cid) | workcancel(reason)
//! ```

pub mod error;
pub mod scheduler;
pub mod select;
pub mod snapshot;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{QueueScheduler, non_empty, sha256_hex};
pub use select::{Candidate, CandidateFilter, Skip, select_candidates};
pub use snapshot::{LedgerSnapshot, Refresher};
