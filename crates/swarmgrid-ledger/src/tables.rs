//! redb table definitions for the local ledger.
//!
//! Record tables use `&str` keys and JSON `&[u8]` values. Request ids are
//! zero-padded to 20 digits so lexical order is numeric order.

use redb::TableDefinition;

/// Open requests keyed by `{request_id:020}`.
pub const QUEUE: TableDefinition<&str, &[u8]> = TableDefinition::new("queue");

/// Claims keyed by `{request_id:020}:{worker}`.
pub const STATUS: TableDefinition<&str, &[u8]> = TableDefinition::new("status");

/// Submitted results keyed by `{request_id:020}:{worker}`.
pub const SOLUTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("solutions");

/// Registered workers keyed by account.
pub const WORKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("workers");

/// Account balances in reward units.
pub const BALANCES: TableDefinition<&str, u64> = TableDefinition::new("balances");

/// Counters: `next_request`, `next_seq`.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Every applied action, in order.
pub const ACTIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("actions");

pub fn request_key(request_id: u64) -> String {
    format!("{request_id:020}")
}

pub fn claim_key(request_id: u64, worker: &str) -> String {
    format!("{request_id:020}:{worker}")
}

/// Prefix shared by every claim on `request_id`.
pub fn claim_prefix(request_id: u64) -> String {
    format!("{request_id:020}:")
}
