use std::sync::Arc;

use metafs_types::Result;

use crate::KvStore;

/// A [`KvStore`] view that prefixes every key with `prefix[:tag]:`.
///
/// The prefix is fixed at construction; the tag is chosen per call so the
/// same handle can address multiple keyspaces (`"i"` for inode records, the
/// empty tag for counters).
#[derive(Clone)]
pub struct NamespacedKv {
    inner: Arc<dyn KvStore>,
    prefix: String,
}

impl NamespacedKv {
    pub fn new(inner: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the physical key for a `(tag, key)` pair.
    pub fn scoped_key(&self, tag: &str, key: &str) -> String {
        if tag.is_empty() {
            format!("{}:{}", self.prefix, key)
        } else {
            format!("{}:{}:{}", self.prefix, tag, key)
        }
    }

    pub fn get(&self, tag: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(&self.scoped_key(tag, key))
    }

    pub fn get_u64(&self, tag: &str, key: &str) -> Result<Option<u64>> {
        self.inner.get_u64(&self.scoped_key(tag, key))
    }

    pub fn put(&self, tag: &str, key: &str, value: &[u8]) -> Result<()> {
        self.inner.put(&self.scoped_key(tag, key), value)
    }

    pub fn put_u64(&self, tag: &str, key: &str, value: u64) -> Result<()> {
        self.inner.put_u64(&self.scoped_key(tag, key), value)
    }

    pub fn inc(&self, tag: &str, key: &str, delta: u64) -> Result<u64> {
        self.inner.inc(&self.scoped_key(tag, key), delta)
    }

    pub fn erase(&self, tag: &str, key: &str) -> Result<()> {
        self.inner.erase(&self.scoped_key(tag, key))
    }
}

impl std::fmt::Debug for NamespacedKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespacedKv")
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// Minimal in-memory store for exercising the wrapper.
    #[derive(Default)]
    struct TableKv {
        data: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl KvStore for TableKv {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.data.lock().get(key).cloned())
        }

        fn get_u64(&self, key: &str) -> Result<Option<u64>> {
            Ok(self.data.lock().get(key).map(|v| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(v);
                u64::from_le_bytes(raw)
            }))
        }

        fn put(&self, key: &str, value: &[u8]) -> Result<()> {
            self.data.lock().insert(key.into(), value.to_vec());
            Ok(())
        }

        fn put_u64(&self, key: &str, value: u64) -> Result<()> {
            self.put(key, &value.to_le_bytes())
        }

        fn inc(&self, key: &str, delta: u64) -> Result<u64> {
            let mut data = self.data.lock();
            let current = data.get(key).map_or(0, |v| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(v);
                u64::from_le_bytes(raw)
            });
            let next = current + delta;
            data.insert(key.into(), next.to_le_bytes().to_vec());
            Ok(next)
        }

        fn erase(&self, key: &str) -> Result<()> {
            self.data.lock().remove(key);
            Ok(())
        }
    }

    #[test]
    fn test_scoped_key_layout() {
        let kv = NamespacedKv::new(Arc::new(TableKv::default()), "fs0");
        assert_eq!(kv.scoped_key("i", "42"), "fs0:i:42");
        assert_eq!(kv.scoped_key("", "nextinode"), "fs0:nextinode");
    }

    #[test]
    fn test_tags_are_disjoint() {
        let store = Arc::new(TableKv::default());
        let kv = NamespacedKv::new(store, "fs0");
        kv.put("i", "1", b"inode-one").unwrap();
        kv.put("d", "1", b"data-one").unwrap();
        assert_eq!(kv.get("i", "1").unwrap().unwrap(), b"inode-one");
        assert_eq!(kv.get("d", "1").unwrap().unwrap(), b"data-one");
        kv.erase("i", "1").unwrap();
        assert!(kv.get("i", "1").unwrap().is_none());
        assert!(kv.get("d", "1").unwrap().is_some());
    }

    #[test]
    fn test_prefixes_are_disjoint() {
        let store = Arc::new(TableKv::default());
        let a = NamespacedKv::new(store.clone(), "a");
        let b = NamespacedKv::new(store, "b");
        a.put_u64("", "ctr", 5).unwrap();
        assert_eq!(a.get_u64("", "ctr").unwrap(), Some(5));
        assert_eq!(b.get_u64("", "ctr").unwrap(), None);
    }

    #[test]
    fn test_inc_through_namespace() {
        let kv = NamespacedKv::new(Arc::new(TableKv::default()), "fs0");
        assert_eq!(kv.inc("", "ctr", 3).unwrap(), 3);
        assert_eq!(kv.inc("", "ctr", 4).unwrap(), 7);
        assert_eq!(kv.get_u64("", "ctr").unwrap(), Some(7));
    }
}
