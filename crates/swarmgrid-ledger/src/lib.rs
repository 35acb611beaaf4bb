//! swarmgrid-ledger — the job board for pull-mode workers.
//!
//! Requesters enqueue jobs with a reward; workers claim them, compute, and
//! submit result hashes. All changes are [`SignedAction`]s applied
//! atomically and in order. The ledger decides claim conflicts; clients
//! hold no locks.
//!
//! # Architecture
//!
//! ```text
//! Ledger (trait)
//!   ├── queue()              open requests
//!   ├── worker_status(id)    claims on one request
//!   ├── claims_of(worker)    unsolved claims of one worker
//!   ├── workers()            registered roster
//!   └── push(SignedAction)   apply or reject
//!
//! LocalLedger (redb)
//!   tables: queue, status, solutions, workers, balances, meta, actions
//! ```

pub mod error;
pub mod ledger;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;
pub use store::LocalLedger;
pub use types::*;
