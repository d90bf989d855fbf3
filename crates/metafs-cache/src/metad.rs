//! The metadata cache: inode map, lookup index, flush pipeline.
//!
//! # Caller contract
//!
//! The filesystem-call adapter drives this cache with the usual FUSE-style
//! reference counting: every successful [`MetaCache::lookup`] grants one
//! lookup reference on the returned entry, and the adapter must eventually
//! release each one through [`MetaCache::forget`]. [`MetaCache::get`] is
//! reference-neutral.
//!
//! # Locking
//!
//! One mutex guards the inode map; each entry carries its own mutex for its
//! attributes and children. When both are needed the map lock is taken
//! first. Operations touching several entries lock parents before the
//! affected child, and for cross-directory moves the two parents lock in
//! ascending inode order. No KV or backend I/O ever runs under the map lock
//! or an entry lock.
//!
//! # Flush pipeline
//!
//! Mutations enqueue the touched inode numbers on a bounded,
//! set-deduplicating queue. A single `mdflush` thread drains it: ADD and
//! SETSIZE tags serialize the entry's state *at drain time* and put it into
//! the KV overlay; DELETE erases the KV key and then releases the delete
//! compensation reference, which is the only path that evicts a deleted
//! entry from memory. A persistence failure is logged and the item dropped
//! without retry; the entry keeps its tag so a later mutation re-enqueues it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use metafs_kv::{KvStore, NamespacedKv};
use metafs_types::{InodeId, Result, Status, StatusCode};

use crate::alloc::InodeAllocator;
use crate::backend::{BackendClient, MdSelector};
use crate::config::CacheConfig;
use crate::entry::{validate_name, Lifecycle, MdEntry, MdRecord, PendingOp, ReleaseOutcome, ROOT_INODE};
use crate::queue::BoundedFlushQueue;

/// Result of [`MetaCache::forget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgetStatus {
    /// The entry was unreferenced and has been dropped from the map.
    Evicted,
    /// References remain (or a delete is still in flight); call again after
    /// they are released.
    Busy,
    /// The inode is not resident.
    NotFound,
}

#[derive(Default)]
struct CacheStats {
    pending_deletes: AtomicU64,
    flushed: AtomicU64,
    flush_failures: AtomicU64,
    kv_loads: AtomicU64,
    backend_loads: AtomicU64,
}

/// Point-in-time counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub resident: usize,
    pub queued: usize,
    pub pending_deletes: u64,
    pub flushed: u64,
    pub flush_failures: u64,
    pub kv_loads: u64,
    pub backend_loads: u64,
}

/// The central inode-number to entry cache.
pub struct MetaCache {
    cfg: CacheConfig,
    kv: NamespacedKv,
    backend: Option<Arc<dyn BackendClient>>,
    allocator: InodeAllocator,
    map: Mutex<HashMap<InodeId, Arc<MdEntry>>>,
    queue: BoundedFlushQueue<InodeId>,
    flusher: Mutex<Option<thread::JoinHandle<()>>>,
    stats: CacheStats,
}

impl MetaCache {
    /// Build a cache over the given store, pre-populating the root entry.
    ///
    /// `backend` is consulted when both the map and the KV overlay miss;
    /// pass `None` for an overlay-only cache.
    pub fn new(
        cfg: CacheConfig,
        store: Arc<dyn KvStore>,
        backend: Option<Arc<dyn BackendClient>>,
    ) -> Arc<Self> {
        let kv = NamespacedKv::new(store, cfg.kv_prefix.clone());
        let allocator = InodeAllocator::new(kv.clone(), cfg.counter_key.clone());
        let mut map = HashMap::new();
        map.insert(ROOT_INODE, Arc::new(MdEntry::new(MdRecord::root())));
        Arc::new(Self {
            queue: BoundedFlushQueue::new(cfg.max_backlog),
            cfg,
            kv,
            backend,
            allocator,
            map: Mutex::new(map),
            flusher: Mutex::new(None),
            stats: CacheStats::default(),
        })
    }

    /// Load persisted state: seed the inode counter and refresh the root
    /// entry from the overlay if an earlier run persisted it.
    pub fn init(&self) -> Result<()> {
        self.allocator.init()?;
        if let Some(blob) = self.kv.get(&self.cfg.inode_tag, &ROOT_INODE.to_string())? {
            let rec = MdRecord::unpack_value(&blob)?;
            let root = self.resident(ROOT_INODE);
            match root {
                Some(root) => root.lock().rec = rec,
                None => {
                    self.map
                        .lock()
                        .insert(ROOT_INODE, Arc::new(MdEntry::new(rec)));
                }
            }
            debug!("root entry refreshed from overlay");
        }
        Ok(())
    }

    // ── Read path ───────────────────────────────────────────────────────

    /// Resolve `name` within `parent`.
    ///
    /// Absence is a valid result: the returned entry is the invalid
    /// sentinel, never an error. On success one lookup reference is granted.
    pub fn lookup(&self, parent: InodeId, name: &str) -> Result<Arc<MdEntry>> {
        let pent = self.get(parent)?;
        if !pent.is_valid() {
            return Ok(MdEntry::sentinel());
        }
        let child = { pent.lock().rec.children.get(name).copied() };
        match child {
            Some(ino) => {
                let entry = self.get(ino)?;
                if entry.is_valid() {
                    entry.grant_lookup();
                }
                Ok(entry)
            }
            None => Ok(MdEntry::sentinel()),
        }
    }

    /// Fetch the entry for `ino`, faulting it in from the KV overlay or the
    /// backend as needed. A cache hit and a freshly loaded entry are
    /// indistinguishable to the caller. Reference-neutral.
    pub fn get(&self, ino: InodeId) -> Result<Arc<MdEntry>> {
        if !ino.is_valid() {
            return Ok(MdEntry::sentinel());
        }
        if let Some(entry) = self.resident(ino) {
            return Ok(entry);
        }

        if let Some(blob) = self.kv.get(&self.cfg.inode_tag, &ino.to_string())? {
            let rec = MdRecord::unpack_value(&blob)?;
            self.stats.kv_loads.fetch_add(1, Ordering::Relaxed);
            return Ok(self.insert_loaded(rec));
        }

        if let Some(backend) = &self.backend {
            if let Some(blob) = backend.get_metadata(&MdSelector::ByInode(ino))? {
                let rec = MdRecord::unpack_value(&blob)?;
                self.stats.backend_loads.fetch_add(1, Ordering::Relaxed);
                return Ok(self.insert_loaded(rec));
            }
        }

        Ok(MdEntry::sentinel())
    }

    /// Whether `ino` is resident in the map right now (no faulting).
    pub fn contains(&self, ino: InodeId) -> bool {
        self.map.lock().contains_key(&ino)
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            resident: self.len(),
            queued: self.queue.len(),
            pending_deletes: self.stats.pending_deletes.load(Ordering::Relaxed),
            flushed: self.stats.flushed.load(Ordering::Relaxed),
            flush_failures: self.stats.flush_failures.load(Ordering::Relaxed),
            kv_loads: self.stats.kv_loads.load(Ordering::Relaxed),
            backend_loads: self.stats.backend_loads.load(Ordering::Relaxed),
        }
    }

    // ── Write path ──────────────────────────────────────────────────────

    /// Create a new entry: allocate its inode, make it resident and queue
    /// the initial persist. The entry is not yet linked into any directory;
    /// that is [`add`](Self::add)'s job.
    pub fn insert(&self, mut rec: MdRecord) -> Result<InodeId> {
        validate_name(&rec.name)?;
        let ino = self.allocator.next()?;
        rec.id = ino;
        let entry = Arc::new(MdEntry::with_op(rec, PendingOp::Add));
        self.map.lock().insert(ino, entry);
        self.enqueue(ino)?;
        Ok(ino)
    }

    /// Re-queue a resident entry after an attribute-only change. The pending
    /// tag is left as-is.
    pub fn update(&self, entry: &Arc<MdEntry>) -> Result<()> {
        self.enqueue(entry.id())
    }

    /// Record a new file size and queue the persist under the SETSIZE tag.
    /// A no-op for entries already heading for deletion.
    pub fn set_size(&self, entry: &Arc<MdEntry>, size: u64) -> Result<()> {
        let ino = {
            let mut inner = entry.lock();
            if inner.state != Lifecycle::Live {
                return Ok(());
            }
            inner.rec.size = size;
            let now = metafs_types::TimeSpec::now();
            inner.rec.mtime = now;
            inner.rec.ctime = now;
            // A not-yet-persisted ADD still covers the size change.
            if inner.op != PendingOp::Add {
                inner.op = PendingOp::SetSize;
            }
            inner.rec.id
        };
        self.enqueue(ino)
    }

    /// Link `child` into `parent`'s children map and queue the parent's
    /// persist (the child's own creation was queued by `insert`).
    pub fn add(&self, parent: &Arc<MdEntry>, child: &Arc<MdEntry>) -> Result<()> {
        let pid = {
            let mut p = parent.lock();
            let mut c = child.lock();
            p.rec.children.insert(c.rec.name.clone(), c.rec.id);
            p.rec.nlink += 1;
            p.rec.mtime = metafs_types::TimeSpec::now();
            c.rec.parent = p.rec.id;
            p.rec.id
        };
        self.enqueue(pid)
    }

    /// Unlink `child` from `parent` and tag it for deferred durable delete.
    ///
    /// The child stays resident (and keeps serving `get`) until the flush
    /// thread has erased it from the overlay and every lookup reference is
    /// gone. Both inodes are queued.
    pub fn remove(&self, parent: &Arc<MdEntry>, child: &Arc<MdEntry>) -> Result<()> {
        let (pid, cid, tagged) = {
            let mut p = parent.lock();
            let mut c = child.lock();
            p.rec.children.remove(&c.rec.name);
            p.rec.nlink = p.rec.nlink.saturating_sub(1);
            p.rec.mtime = metafs_types::TimeSpec::now();
            let tagged = c.tag_delete();
            (p.rec.id, c.rec.id, tagged)
        };
        if tagged {
            self.stats.pending_deletes.fetch_add(1, Ordering::Relaxed);
        }
        self.enqueue(pid)?;
        self.enqueue(cid)
    }

    /// Rename (and possibly re-parent) `entry` to `new_name`.
    ///
    /// Lock order: parent(s) first (ascending inode order when the move
    /// crosses directories), then the moved entry. A same-directory move
    /// touches only that directory and the entry, and queues exactly those
    /// two inodes.
    pub fn mv(
        &self,
        old_parent: &Arc<MdEntry>,
        new_parent: &Arc<MdEntry>,
        entry: &Arc<MdEntry>,
        new_name: &str,
    ) -> Result<()> {
        validate_name(new_name)?;
        let now = metafs_types::TimeSpec::now();

        if Arc::ptr_eq(old_parent, new_parent) {
            let (pid, eid) = {
                let mut p = old_parent.lock();
                let mut e = entry.lock();
                let old_name = std::mem::replace(&mut e.rec.name, new_name.to_string());
                p.rec.children.remove(&old_name);
                p.rec.children.insert(new_name.to_string(), e.rec.id);
                p.rec.mtime = now;
                e.rec.ctime = now;
                (p.rec.id, e.rec.id)
            };
            self.enqueue(pid)?;
            return self.enqueue(eid);
        }

        let old_first = old_parent.id().raw() <= new_parent.id().raw();
        let (first, second) = if old_first {
            (old_parent, new_parent)
        } else {
            (new_parent, old_parent)
        };
        let g_first = first.lock();
        let g_second = second.lock();
        let (mut op_g, mut np_g) = if old_first {
            (g_first, g_second)
        } else {
            (g_second, g_first)
        };
        let mut e = entry.lock();

        let old_name = std::mem::replace(&mut e.rec.name, new_name.to_string());
        op_g.rec.children.remove(&old_name);
        op_g.rec.nlink = op_g.rec.nlink.saturating_sub(1);
        op_g.rec.mtime = now;
        np_g.rec.children.insert(new_name.to_string(), e.rec.id);
        np_g.rec.nlink += 1;
        np_g.rec.mtime = now;
        e.rec.parent = np_g.rec.id;
        e.rec.ctime = now;

        let (opid, npid, eid) = (op_g.rec.id, np_g.rec.id, e.rec.id);
        drop(e);
        drop(op_g);
        drop(np_g);

        self.enqueue(opid)?;
        self.enqueue(npid)?;
        self.enqueue(eid)
    }

    /// Release `nlookup` references previously granted by `lookup`.
    ///
    /// Evicts the entry once it is unreferenced, unless a pending delete
    /// still pins it (the flush thread finishes those). The root entry is
    /// never evicted.
    pub fn forget(&self, ino: InodeId, nlookup: u64) -> ForgetStatus {
        let mut map = self.map.lock();
        let Some(entry) = map.get(&ino).cloned() else {
            return ForgetStatus::NotFound;
        };
        let outcome = entry.release_lookup(nlookup);
        if ino == ROOT_INODE {
            return ForgetStatus::Busy;
        }
        match outcome {
            ReleaseOutcome::Evictable => {
                map.remove(&ino);
                ForgetStatus::Evicted
            }
            ReleaseOutcome::Retained => ForgetStatus::Busy,
        }
    }

    // ── Flush pipeline ──────────────────────────────────────────────────

    /// Start the background flush thread. Idempotent.
    pub fn start(this: &Arc<Self>) -> Result<()> {
        let mut slot = this.flusher.lock();
        if slot.is_some() {
            return Ok(());
        }
        let me = Arc::clone(this);
        let handle = thread::Builder::new()
            .name("mdflush".into())
            .spawn(move || me.flush_loop())
            .map_err(|e| {
                Status::with_message(StatusCode::OS_ERROR, format!("spawn mdflush: {}", e))
            })?;
        *slot = Some(handle);
        info!("mdflush thread started");
        Ok(())
    }

    /// Close the queue and join the flush thread. The remaining backlog is
    /// drained by the thread before it exits; nothing new can be queued.
    pub fn stop(&self) {
        self.queue.close();
        if let Some(handle) = self.flusher.lock().take() {
            if handle.join().is_err() {
                error!("mdflush thread panicked");
            }
        }
    }

    fn flush_loop(&self) {
        while let Some(ino) = self.queue.pop() {
            self.flush_entry(ino);
        }
        debug!("mdflush thread exiting");
    }

    /// Apply one drained backlog item.
    fn flush_entry(&self, ino: InodeId) {
        let entry = self.resident(ino);
        let Some(entry) = entry else {
            // Raced with eviction; the durable state is already final.
            debug!(%ino, "flush skipped, inode no longer resident");
            return;
        };

        // Serialize (or decide to erase) under the entry lock; the store
        // round-trip happens after it is released.
        enum Step {
            Persist(Vec<u8>),
            Erase,
        }
        let (step, op_seen) = {
            let inner = entry.lock();
            match inner.op {
                PendingOp::Delete => (Step::Erase, PendingOp::Delete),
                op => match inner.rec.pack_value() {
                    Ok(blob) => (Step::Persist(blob), op),
                    Err(status) => {
                        error!(%ino, %status, "flush serialization failed");
                        self.stats.flush_failures.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                },
            }
        };

        let key = ino.to_string();
        match step {
            Step::Persist(blob) => match self.kv.put(&self.cfg.inode_tag, &key, &blob) {
                Ok(()) => {
                    self.stats.flushed.fetch_add(1, Ordering::Relaxed);
                    let mut inner = entry.lock();
                    // A mutation racing the store round-trip re-tagged the
                    // entry and re-queued it; only a quiet one is settled.
                    if inner.op == op_seen {
                        inner.op = PendingOp::None;
                    }
                }
                Err(status) => {
                    // Dropped after a single attempt; a later mutation of the
                    // same inode re-enqueues it.
                    error!(%ino, %status, "flush persist failed, entry dropped from backlog");
                    self.stats.flush_failures.fetch_add(1, Ordering::Relaxed);
                }
            },
            Step::Erase => match self.kv.erase(&self.cfg.inode_tag, &key) {
                Ok(()) => {
                    self.stats.flushed.fetch_add(1, Ordering::Relaxed);
                    let evict = {
                        let mut inner = entry.lock();
                        if inner.state == Lifecycle::PendingDelete {
                            self.stats.pending_deletes.fetch_sub(1, Ordering::Relaxed);
                        }
                        inner.complete_durable_delete()
                    };
                    if evict {
                        self.map.lock().remove(&ino);
                        debug!(%ino, "deleted entry evicted after durable erase");
                    }
                }
                Err(status) => {
                    // The entry stays resident and pinned; memory is not
                    // reclaimed until a durable erase succeeds.
                    error!(%ino, %status, "flush erase failed, delete still pending");
                    self.stats.flush_failures.fetch_add(1, Ordering::Relaxed);
                }
            },
        }
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn resident(&self, ino: InodeId) -> Option<Arc<MdEntry>> {
        self.map.lock().get(&ino).cloned()
    }

    fn enqueue(&self, ino: InodeId) -> Result<()> {
        self.queue.push(ino)
    }

    /// Make a record loaded from the overlay or backend resident. Loses the
    /// race gracefully when another thread faulted the same inode in first.
    fn insert_loaded(&self, rec: MdRecord) -> Arc<MdEntry> {
        let ino = rec.id;
        let mut map = self.map.lock();
        match map.get(&ino) {
            Some(existing) => {
                warn!(%ino, "concurrent fault-in, keeping first entry");
                existing.clone()
            }
            None => {
                let entry = Arc::new(MdEntry::new(rec));
                map.insert(ino, entry.clone());
                entry
            }
        }
    }
}

impl std::fmt::Debug for MetaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaCache")
            .field("resident", &self.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}
