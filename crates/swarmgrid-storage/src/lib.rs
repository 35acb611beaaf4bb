//! swarmgrid-storage — moving job inputs and results through a
//! content-addressed blob store.
//!
//! # Architecture
//!
//! ```text
//! ResultPublisher
//!   ├── publish(bytes)  → BlobStore::add → pin (skipped if pinned recently)
//!   ├── fetch(cid)      → race: BlobStore::cat | mirror 1 | mirror 2 | ...
//!   │                     first validated response wins, retried with backoff
//!   └── connect_peers   → BlobStore::swarm_connect (skipped if connected recently)
//!
//! BlobStore
//!   ├── IpfsHttpStore    (node HTTP API over hyper)
//!   └── MemoryBlobStore  (sha256-addressed, in-process)
//! ```

pub mod error;
pub mod http_client;
pub mod publisher;
pub mod store;
pub mod ttl_cache;

pub use error::{StorageError, StorageResult};
pub use publisher::{ResultPublisher, gateway_url};
pub use store::{BlobStore, IpfsHttpStore, MemoryBlobStore};
pub use ttl_cache::{CacheStats, TtlCache};
