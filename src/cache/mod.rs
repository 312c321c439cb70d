//! Versioned cache buckets and the caching strategies built on them.
//!
//! - `traits`: the bucket store contract and the stored-entry snapshot
//! - `storage`: SQLite implementation (also hosts the sync queue)
//! - `layer`: cache-first, network-first, stale-while-revalidate, passthrough

mod layer;
mod storage;
mod traits;

pub use layer::Strategies;
pub use storage::SqliteStore;
pub use traits::{BucketStore, StoredEntry};
