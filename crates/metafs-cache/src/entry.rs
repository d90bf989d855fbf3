//! One cached inode: the serializable record plus in-memory cache state.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::warn;

use metafs_types::{make_error_msg, Gid, InodeId, MdCode, Result, TimeSpec, Uid};

use crate::attr::{blocks_for, FileAttr, EXPORT_BLKSIZE};

/// The root directory's inode number.
pub const ROOT_INODE: InodeId = InodeId(1);

/// The root directory's internal name.
pub const ROOT_NAME: &str = ":root:";

/// File type bits (u32 regardless of the platform's `mode_t` width).
pub const S_IFMT: u32 = libc::S_IFMT as u32;
pub const S_IFREG: u32 = libc::S_IFREG as u32;
pub const S_IFDIR: u32 = libc::S_IFDIR as u32;

// ── Serializable record ─────────────────────────────────────────────────────

/// The persisted part of a metadata entry.
///
/// Serialized as an opaque blob (`pack_value`) under the entry's decimal
/// inode number in the KV overlay. `nlink` stores the real link count; a
/// directory's two implicit links (`.` and `..`) are added at attribute
/// export, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdRecord {
    pub id: InodeId,
    pub parent: InodeId,
    pub name: String,
    /// Child name to child inode. Only meaningful for directories.
    #[serde(default)]
    pub children: BTreeMap<String, InodeId>,
    pub nlink: u32,
    pub mode: u32,
    pub uid: Uid,
    pub gid: Gid,
    pub size: u64,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub ctime: TimeSpec,
}

impl Default for MdRecord {
    fn default() -> Self {
        Self {
            id: InodeId::NONE,
            parent: InodeId::NONE,
            name: String::new(),
            children: BTreeMap::new(),
            nlink: 0,
            mode: 0,
            uid: Uid(0),
            gid: Gid(0),
            size: 0,
            atime: TimeSpec::default(),
            mtime: TimeSpec::default(),
            ctime: TimeSpec::default(),
        }
    }
}

impl MdRecord {
    /// A regular-file record, not yet linked into a parent.
    pub fn new_file(name: impl Into<String>, mode: u32, uid: Uid, gid: Gid) -> Self {
        let now = TimeSpec::now();
        Self {
            name: name.into(),
            nlink: 1,
            mode: S_IFREG | (mode & 0o7777),
            uid,
            gid,
            atime: now,
            mtime: now,
            ctime: now,
            ..Default::default()
        }
    }

    /// A directory record, not yet linked into a parent.
    pub fn new_directory(name: impl Into<String>, mode: u32, uid: Uid, gid: Gid) -> Self {
        let now = TimeSpec::now();
        Self {
            name: name.into(),
            nlink: 0,
            mode: S_IFDIR | (mode & 0o7777),
            uid,
            gid,
            atime: now,
            mtime: now,
            ctime: now,
            ..Default::default()
        }
    }

    /// The pre-populated root directory record.
    pub fn root() -> Self {
        let mut rec = Self::new_directory(ROOT_NAME, 0o755, Uid(0), Gid(0));
        rec.id = ROOT_INODE;
        rec.parent = InodeId::NONE;
        rec
    }

    pub fn is_directory(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Serialize for KV storage.
    pub fn pack_value(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            metafs_types::Status::with_message(
                MdCode::SERIALIZE_FAILED,
                format!("inode {}: {}", self.id, e),
            )
        })
    }

    /// Deserialize a KV value.
    pub fn unpack_value(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| {
            metafs_types::Status::with_message(
                metafs_types::StatusCode::DATA_CORRUPTION,
                format!("undecodable metadata record: {}", e),
            )
        })
    }
}

// ── In-memory cache state ───────────────────────────────────────────────────

/// The last mutation not yet durably flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingOp {
    #[default]
    None,
    Add,
    SetSize,
    Delete,
}

/// Entry lifecycle, driving the deferred-durable-delete protocol.
///
/// `PendingDelete` pins the entry in the map: only the flush thread's
/// [`MdEntry::complete_durable_delete`] (after a successful KV erase) moves
/// it to `Deleted`, at which point reference-count-driven eviction applies
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Live,
    PendingDelete,
    Deleted,
}

/// Everything behind the per-entry mutex.
#[derive(Debug)]
pub struct MdInner {
    pub rec: MdRecord,
    /// Outstanding lookup references held by the filesystem adapter.
    pub lookup_count: u64,
    pub op: PendingOp,
    pub state: Lifecycle,
}

impl MdInner {
    /// Tag for deletion; see [`MdEntry::tag_delete`]. Exposed on the inner
    /// state so callers already holding the entry lock can use it.
    pub fn tag_delete(&mut self) -> bool {
        if self.state != Lifecycle::Live {
            return false;
        }
        self.lookup_count += 1;
        self.op = PendingOp::Delete;
        self.state = Lifecycle::PendingDelete;
        true
    }

    /// Release `n` lookup references; see [`MdEntry::release_lookup`].
    pub fn release_lookup(&mut self, n: u64) -> ReleaseOutcome {
        if n > self.lookup_count {
            warn!(
                ino = %self.rec.id,
                held = self.lookup_count,
                released = n,
                "forget released more lookups than were granted"
            );
            self.lookup_count = 0;
        } else {
            self.lookup_count -= n;
        }
        if self.lookup_count == 0 && self.state != Lifecycle::PendingDelete {
            ReleaseOutcome::Evictable
        } else {
            ReleaseOutcome::Retained
        }
    }

    /// Account a durably applied delete; see
    /// [`MdEntry::complete_durable_delete`].
    pub fn complete_durable_delete(&mut self) -> bool {
        if self.state == Lifecycle::PendingDelete {
            self.lookup_count = self.lookup_count.saturating_sub(1);
            self.state = Lifecycle::Deleted;
        }
        self.lookup_count == 0
    }
}

/// What `release_lookup` decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Count reached zero and nothing pins the entry; the caller owns the
    /// map removal.
    Evictable,
    /// References remain, or a pending delete pins the entry.
    Retained,
}

/// A cached inode entry shared between call threads and the flush thread.
///
/// All field access goes through the entry mutex; when an operation also
/// holds the cache map lock, the map lock is always taken first.
pub struct MdEntry {
    inner: Mutex<MdInner>,
}

impl MdEntry {
    pub fn new(rec: MdRecord) -> Self {
        Self::with_op(rec, PendingOp::None)
    }

    pub fn with_op(rec: MdRecord, op: PendingOp) -> Self {
        Self {
            inner: Mutex::new(MdInner {
                rec,
                lookup_count: 0,
                op,
                state: Lifecycle::Live,
            }),
        }
    }

    /// The shared "not found" entry: inode 0, no attributes.
    pub fn sentinel() -> Arc<MdEntry> {
        Arc::new(MdEntry::new(MdRecord::default()))
    }

    pub fn lock(&self) -> MutexGuard<'_, MdInner> {
        self.inner.lock()
    }

    pub fn id(&self) -> InodeId {
        self.inner.lock().rec.id
    }

    /// Whether this is a real entry rather than the not-found sentinel.
    pub fn is_valid(&self) -> bool {
        self.inner.lock().rec.id.is_valid()
    }

    pub fn lookup_count(&self) -> u64 {
        self.inner.lock().lookup_count
    }

    pub fn pending_op(&self) -> PendingOp {
        self.inner.lock().op
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().state
    }

    /// Record one lookup reference handed to the adapter.
    pub fn grant_lookup(&self) {
        self.inner.lock().lookup_count += 1;
    }

    /// Release `n` lookup references.
    ///
    /// Releasing more than were ever granted is a caller contract violation;
    /// the count saturates at zero and the violation is logged. An entry
    /// whose delete has not yet been durably applied is never evictable,
    /// whatever the count.
    pub fn release_lookup(&self, n: u64) -> ReleaseOutcome {
        self.inner.lock().release_lookup(n)
    }

    /// Tag this entry for deletion (called under the parent-removal path).
    ///
    /// Adds the compensation reference that [`complete_durable_delete`]
    /// releases once the KV erase has succeeded. Returns `false` when the
    /// entry was already tagged or deleted.
    ///
    /// [`complete_durable_delete`]: MdEntry::complete_durable_delete
    pub fn tag_delete(&self) -> bool {
        self.inner.lock().tag_delete()
    }

    /// Account a durably applied delete: drop the compensation reference and
    /// leave `PendingDelete`. Returns `true` when the entry is now
    /// unreferenced and may be removed from the map. Idempotent: a second
    /// call (a DELETE observed twice under a drain race) releases nothing
    /// further.
    ///
    /// Only the flush thread calls this, and only after the KV erase
    /// returned success.
    pub fn complete_durable_delete(&self) -> bool {
        self.inner.lock().complete_durable_delete()
    }

    /// Export POSIX attributes. Directories report their two implicit links
    /// (`.` and `..`) here, on top of the stored count.
    pub fn to_attr(&self) -> FileAttr {
        let inner = self.inner.lock();
        let rec = &inner.rec;
        let implicit = if rec.is_directory() { 2 } else { 0 };
        FileAttr {
            ino: rec.id.raw(),
            size: rec.size,
            blocks: blocks_for(rec.size),
            atime: rec.atime.sec,
            atime_nsec: rec.atime.nsec,
            mtime: rec.mtime.sec,
            mtime_nsec: rec.mtime.nsec,
            ctime: rec.ctime.sec,
            ctime_nsec: rec.ctime.nsec,
            mode: rec.mode,
            nlink: rec.nlink + implicit,
            uid: rec.uid.raw(),
            gid: rec.gid.raw(),
            rdev: 0,
            blksize: EXPORT_BLKSIZE,
        }
    }

    /// Snapshot the record (for tests and diagnostics).
    pub fn record(&self) -> MdRecord {
        self.inner.lock().rec.clone()
    }
}

impl std::fmt::Debug for MdEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MdEntry")
            .field("ino", &inner.rec.id)
            .field("name", &inner.rec.name)
            .field("lookup_count", &inner.lookup_count)
            .field("op", &inner.op)
            .field("state", &inner.state)
            .finish()
    }
}

/// Guard against silent misuse of the record constructors.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return make_error_msg(
            metafs_types::StatusCode::INVALID_ARG,
            format!("invalid entry name {:?}", name),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_record(name: &str) -> MdRecord {
        MdRecord::new_file(name, 0o644, Uid(1000), Gid(1000))
    }

    #[test]
    fn test_record_pack_roundtrip() {
        let mut rec = file_record("foo.txt");
        rec.id = InodeId(17);
        rec.parent = ROOT_INODE;
        rec.size = 4096;
        let blob = rec.pack_value().unwrap();
        let back = MdRecord::unpack_value(&blob).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_unpack_garbage_is_corruption() {
        let err = MdRecord::unpack_value(b"{not json").unwrap_err();
        assert_eq!(err.code(), metafs_types::StatusCode::DATA_CORRUPTION);
    }

    #[test]
    fn test_root_record_shape() {
        let root = MdRecord::root();
        assert_eq!(root.id, ROOT_INODE);
        assert_eq!(root.name, ROOT_NAME);
        assert!(root.is_directory());
        assert_eq!(root.nlink, 0);
        assert!(root.children.is_empty());
    }

    #[test]
    fn test_sentinel_is_invalid() {
        let s = MdEntry::sentinel();
        assert!(!s.is_valid());
        assert_eq!(s.id(), InodeId::NONE);
    }

    #[test]
    fn test_grant_release_roundtrip() {
        let e = MdEntry::new(file_record("a"));
        e.grant_lookup();
        e.grant_lookup();
        assert_eq!(e.lookup_count(), 2);
        assert_eq!(e.release_lookup(1), ReleaseOutcome::Retained);
        assert_eq!(e.release_lookup(1), ReleaseOutcome::Evictable);
    }

    #[test]
    fn test_release_saturates_at_zero() {
        let e = MdEntry::new(file_record("a"));
        e.grant_lookup();
        assert_eq!(e.release_lookup(10), ReleaseOutcome::Evictable);
        assert_eq!(e.lookup_count(), 0);
    }

    #[test]
    fn test_tag_delete_adds_compensation_reference() {
        let e = MdEntry::new(file_record("a"));
        e.grant_lookup();
        assert!(e.tag_delete());
        assert_eq!(e.lookup_count(), 2);
        assert_eq!(e.pending_op(), PendingOp::Delete);
        assert_eq!(e.lifecycle(), Lifecycle::PendingDelete);
        // Tagging twice is refused.
        assert!(!e.tag_delete());
        assert_eq!(e.lookup_count(), 2);
    }

    #[test]
    fn test_pending_delete_pins_entry() {
        let e = MdEntry::new(file_record("a"));
        assert!(e.tag_delete());
        // Even a saturating over-release cannot evict a pending delete.
        assert_eq!(e.release_lookup(100), ReleaseOutcome::Retained);
        assert_eq!(e.lookup_count(), 0);
    }

    #[test]
    fn test_complete_durable_delete() {
        let e = MdEntry::new(file_record("a"));
        e.grant_lookup();
        assert!(e.tag_delete());
        // Adapter still holds its reference: not yet evictable.
        assert!(!e.complete_durable_delete());
        assert_eq!(e.lifecycle(), Lifecycle::Deleted);
        assert_eq!(e.lookup_count(), 1);
        // Once the adapter forgets, the entry can go.
        assert_eq!(e.release_lookup(1), ReleaseOutcome::Evictable);
    }

    #[test]
    fn test_complete_durable_delete_with_no_references() {
        let e = MdEntry::new(file_record("a"));
        assert!(e.tag_delete());
        assert_eq!(e.lookup_count(), 1);
        assert!(e.complete_durable_delete());
    }

    #[test]
    fn test_complete_durable_delete_is_idempotent() {
        let e = MdEntry::new(file_record("a"));
        e.grant_lookup();
        assert!(e.tag_delete());
        assert_eq!(e.lookup_count(), 2);
        assert!(!e.complete_durable_delete());
        // A second completion must not release the adapter's reference.
        assert!(!e.complete_durable_delete());
        assert_eq!(e.lookup_count(), 1);
    }

    #[test]
    fn test_attr_export_directory_nlink() {
        let mut rec = MdRecord::new_directory("d", 0o755, Uid(0), Gid(0));
        rec.id = InodeId(9);
        rec.nlink = 3;
        let attr = MdEntry::new(rec).to_attr();
        assert_eq!(attr.nlink, 5);
        assert_eq!(attr.mode & S_IFMT, S_IFDIR);
    }

    #[test]
    fn test_attr_export_copies_timestamps_verbatim() {
        let mut rec = file_record("t");
        rec.id = InodeId(4);
        rec.atime = TimeSpec::new(100, 1);
        rec.mtime = TimeSpec::new(200, 2);
        rec.ctime = TimeSpec::new(300, 3);
        rec.size = 1000;
        let attr = MdEntry::new(rec).to_attr();
        assert_eq!((attr.atime, attr.atime_nsec), (100, 1));
        assert_eq!((attr.mtime, attr.mtime_nsec), (200, 2));
        assert_eq!((attr.ctime, attr.ctime_nsec), (300, 3));
        assert_eq!(attr.blocks, 2);
        assert_eq!(attr.nlink, 1);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("ok.txt").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
    }
}
