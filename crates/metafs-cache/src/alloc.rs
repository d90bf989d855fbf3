//! Persistent inode number allocation.

use metafs_kv::NamespacedKv;
use metafs_types::{InodeId, Result};
use tracing::{debug, error};

use crate::entry::ROOT_INODE;

/// Hands out monotonically increasing inode numbers.
///
/// The counter lives in the KV overlay under the configured key and holds
/// the last issued number; allocation is the store's atomic increment, so a
/// restart continues after the highest number ever made durable and never
/// re-issues one. Any store failure is fatal to the creating operation:
/// a colliding or zero inode must never escape.
pub struct InodeAllocator {
    kv: NamespacedKv,
    key: String,
}

impl InodeAllocator {
    pub fn new(kv: NamespacedKv, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    /// Load or seed the persisted counter.
    ///
    /// A fresh store is seeded with the root inode number so the first
    /// allocation lands just above it.
    pub fn init(&self) -> Result<()> {
        match self.kv.get_u64("", &self.key)? {
            Some(current) => {
                debug!(counter = current, "inode counter loaded");
                Ok(())
            }
            None => {
                self.kv.put_u64("", &self.key, ROOT_INODE.raw())?;
                debug!(counter = ROOT_INODE.raw(), "inode counter seeded");
                Ok(())
            }
        }
    }

    /// Reserve and return a fresh inode number.
    pub fn next(&self) -> Result<InodeId> {
        match self.kv.inc("", &self.key, 1) {
            Ok(total) => Ok(InodeId(total)),
            Err(status) => {
                error!(%status, "inode allocation failed");
                Err(status)
            }
        }
    }
}

impl std::fmt::Debug for InodeAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InodeAllocator")
            .field("key", &self.key)
            .finish()
    }
}
