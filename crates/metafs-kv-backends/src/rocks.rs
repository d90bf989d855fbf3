//! RocksDB driver, feature-gated behind `"rocksdb"`.
//!
//! Counters share the 8-byte little-endian representation of [`crate::mem`].
//! `inc` serializes read-modify-write behind a process-local mutex: the
//! overlay store has exactly one writing process per mount, so a local
//! critical section gives the contract's atomicity without a merge operator.

use std::path::Path;

use parking_lot::Mutex;

use metafs_kv::KvStore;
use metafs_types::{KvCode, Result, Status};

pub struct RocksKv {
    db: rocksdb::DB,
    inc_lock: Mutex<()>,
}

fn decode_u64(key: &str, raw: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| {
        Status::with_message(
            KvCode::BAD_VALUE,
            format!("counter {:?} has length {}", key, raw.len()),
        )
    })?;
    Ok(u64::from_le_bytes(bytes))
}

impl RocksKv {
    /// Open (creating if necessary) a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = rocksdb::DB::open_default(path.as_ref()).map_err(|e| {
            Status::with_message(KvCode::OPEN_FAILED, format!("rocksdb open: {}", e))
        })?;
        Ok(Self {
            db,
            inc_lock: Mutex::new(()),
        })
    }
}

impl KvStore for RocksKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.db
            .get(key.as_bytes())
            .map_err(|e| Status::with_message(KvCode::GET_FAILED, format!("rocksdb get: {}", e)))
    }

    fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(decode_u64(key, &raw)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db
            .put(key.as_bytes(), value)
            .map_err(|e| Status::with_message(KvCode::PUT_FAILED, format!("rocksdb put: {}", e)))
    }

    fn put_u64(&self, key: &str, value: u64) -> Result<()> {
        self.put(key, &value.to_le_bytes())
    }

    fn inc(&self, key: &str, delta: u64) -> Result<u64> {
        let _serial = self.inc_lock.lock();
        let current = self.get_u64(key)?.unwrap_or(0);
        let next = current.checked_add(delta).ok_or_else(|| {
            Status::with_message(KvCode::INC_FAILED, format!("counter {:?} overflow", key))
        })?;
        self.put_u64(key, next)?;
        Ok(next)
    }

    fn erase(&self, key: &str) -> Result<()> {
        self.db.delete(key.as_bytes()).map_err(|e| {
            Status::with_message(KvCode::ERASE_FAILED, format!("rocksdb delete: {}", e))
        })
    }
}
