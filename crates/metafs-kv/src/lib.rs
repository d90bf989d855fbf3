//! The durable key-value contract backing the metadata cache.
//!
//! A [`KvStore`] holds opaque byte values and unsigned counters under string
//! keys. The result mapping is uniform across backends:
//!
//! - `Ok(Some(..))` / `Ok(())`: success.
//! - `Ok(None)`: key not found. Non-fatal; callers fall back to a default
//!   or create the entry.
//! - `Err(status)`: unexpected backend failure. Fatal to the calling
//!   operation; it must be surfaced, never swallowed.
//!
//! [`NamespacedKv`] scopes every key of a shared store with a configured
//! prefix plus an optional secondary tag, so one store can carry several
//! logical keyspaces (inode records, counters, ...).

use std::sync::Arc;

use metafs_types::Result;

mod namespace;

pub use namespace::NamespacedKv;

/// Blocking key-value store operations.
///
/// Implementations must be safe to share across the filesystem-call threads
/// and the flush threads; all methods take `&self`.
pub trait KvStore: Send + Sync {
    /// Fetch the raw value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Fetch a counter stored under `key`.
    fn get_u64(&self, key: &str) -> Result<Option<u64>>;

    /// Store a raw value under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Store a counter under `key`.
    fn put_u64(&self, key: &str, value: u64) -> Result<()>;

    /// Atomically add `delta` to the counter under `key` and return the new
    /// total. A missing key counts as zero.
    fn inc(&self, key: &str, delta: u64) -> Result<u64>;

    /// Remove `key`. Removing an absent key succeeds.
    fn erase(&self, key: &str) -> Result<()>;
}

/// A shared, type-erased store handle.
pub type SharedKv = Arc<dyn KvStore>;
