//! Contract with the remote metadata authority.
//!
//! The cache consults the backend when both the in-memory map and the KV
//! overlay miss, and may push serialized records to it on durable write
//! paths. Wire framing, retries and authentication live behind the
//! implementation; blobs are the entry serialization
//! ([`crate::MdRecord::pack_value`]).

use metafs_types::{InodeId, Result};

/// How to address a remote metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MdSelector {
    ByInode(InodeId),
    ByPath(String),
}

/// Synchronous request/response shim to the metadata authority.
///
/// `Ok(None)` means the authority does not know the entry (surfaced to the
/// adapter as not-found); `Err` is a failure of the request itself.
pub trait BackendClient: Send + Sync {
    fn get_metadata(&self, selector: &MdSelector) -> Result<Option<Vec<u8>>>;

    fn put_metadata(&self, blob: &[u8]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_equality() {
        assert_eq!(
            MdSelector::ByInode(InodeId(3)),
            MdSelector::ByInode(InodeId(3))
        );
        assert_ne!(
            MdSelector::ByInode(InodeId(3)),
            MdSelector::ByPath("/3".into())
        );
    }
}
