//! The file-content handle cache.
//!
//! Mirrors the metadata cache's map + bounded-queue + background-thread
//! shape without parent/child tracking or operation tags: content handles
//! have no deferred durable delete, and their `flush` is an extension point
//! rather than a KV round-trip.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, trace};

use metafs_types::{InodeId, Result, Status, StatusCode};

use crate::config::DataCacheConfig;
use crate::queue::BoundedFlushQueue;

/// In-memory state of one open file's content handle.
#[derive(Debug)]
pub struct DataInner {
    pub id: InodeId,
    /// Buffered writes not yet handed to the I/O layer.
    pub dirty: bool,
    /// Set by `unlink`; a flush observing this does nothing.
    pub unlinked: bool,
}

/// A cached content handle, keyed by inode.
pub struct DataEntry {
    inner: Mutex<DataInner>,
}

impl DataEntry {
    pub fn new(id: InodeId) -> Self {
        Self {
            inner: Mutex::new(DataInner {
                id,
                dirty: false,
                unlinked: false,
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, DataInner> {
        self.inner.lock()
    }

    pub fn id(&self) -> InodeId {
        self.inner.lock().id
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    pub fn is_unlinked(&self) -> bool {
        self.inner.lock().unlinked
    }

    /// Note buffered content that the next flush pass should write back.
    pub fn mark_dirty(&self) {
        self.inner.lock().dirty = true;
    }

    fn mark_unlinked(&self) {
        self.inner.lock().unlinked = true;
    }

    /// Write-back hook invoked by the flush thread.
    ///
    /// Content persistence belongs to the I/O layer; this clears the dirty
    /// flag so the pipeline's bookkeeping is observable, and is where a real
    /// write-back implementation plugs in.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.unlinked {
            trace!(ino = %inner.id, "content flush skipped, unlinked");
            return Ok(());
        }
        trace!(ino = %inner.id, dirty = inner.dirty, "content flush");
        inner.dirty = false;
        Ok(())
    }
}

impl std::fmt::Debug for DataEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("DataEntry")
            .field("ino", &inner.id)
            .field("dirty", &inner.dirty)
            .field("unlinked", &inner.unlinked)
            .finish()
    }
}

/// The inode-number to content-handle cache.
pub struct DataCache {
    map: Mutex<HashMap<InodeId, Arc<DataEntry>>>,
    queue: BoundedFlushQueue<InodeId>,
    flusher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl DataCache {
    pub fn new(cfg: DataCacheConfig) -> Arc<Self> {
        Arc::new(Self {
            map: Mutex::new(HashMap::new()),
            queue: BoundedFlushQueue::new(cfg.max_backlog),
            flusher: Mutex::new(None),
        })
    }

    /// Fetch the handle for `ino`, creating one on first use.
    pub fn get(&self, ino: InodeId) -> Arc<DataEntry> {
        self.map
            .lock()
            .entry(ino)
            .or_insert_with(|| Arc::new(DataEntry::new(ino)))
            .clone()
    }

    /// Re-insert `entry` and queue it for write-back, blocking while the
    /// backlog is full.
    pub fn commit(&self, entry: &Arc<DataEntry>) -> Result<()> {
        let ino = entry.id();
        self.map.lock().insert(ino, entry.clone());
        self.queue.push(ino)
    }

    /// Drop the handle immediately. No deferred handshake: content itself is
    /// not persisted through this cache.
    pub fn unlink(&self, ino: InodeId) {
        if let Some(entry) = self.map.lock().remove(&ino) {
            entry.mark_unlinked();
            debug!(%ino, "content handle unlinked");
        }
    }

    pub fn contains(&self, ino: InodeId) -> bool {
        self.map.lock().contains_key(&ino)
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Start the background flush thread. Idempotent.
    pub fn start(this: &Arc<Self>) -> Result<()> {
        let mut slot = this.flusher.lock();
        if slot.is_some() {
            return Ok(());
        }
        let me = Arc::clone(this);
        let handle = thread::Builder::new()
            .name("dataxflush".into())
            .spawn(move || me.flush_loop())
            .map_err(|e| {
                Status::with_message(StatusCode::OS_ERROR, format!("spawn dataxflush: {}", e))
            })?;
        *slot = Some(handle);
        info!("dataxflush thread started");
        Ok(())
    }

    /// Close the queue and join the flush thread.
    pub fn stop(&self) {
        self.queue.close();
        if let Some(handle) = self.flusher.lock().take() {
            if handle.join().is_err() {
                error!("dataxflush thread panicked");
            }
        }
    }

    fn flush_loop(&self) {
        while let Some(ino) = self.queue.pop() {
            self.flush_one(ino);
        }
        debug!("dataxflush thread exiting");
    }

    fn flush_one(&self, ino: InodeId) {
        let entry = self.map.lock().get(&ino).cloned();
        match entry {
            Some(entry) => {
                if let Err(status) = entry.flush() {
                    error!(%ino, %status, "content flush failed");
                }
            }
            None => {
                // Unlinked between enqueue and drain.
                debug!(%ino, "content flush skipped, handle gone");
            }
        }
    }
}

impl std::fmt::Debug for DataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataCache")
            .field("resident", &self.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}
