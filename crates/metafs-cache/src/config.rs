//! Cache configuration.

use serde::{Deserialize, Serialize};

/// Metadata cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of inodes waiting in the flush backlog. Producers
    /// block once the backlog is full.
    #[serde(default = "default_max_backlog")]
    pub max_backlog: usize,

    /// Key prefix scoping this mount's keys in the shared KV store.
    #[serde(default = "default_kv_prefix")]
    pub kv_prefix: String,

    /// Secondary namespace tag for inode records.
    #[serde(default = "default_inode_tag")]
    pub inode_tag: String,

    /// Key of the persisted inode counter.
    #[serde(default = "default_counter_key")]
    pub counter_key: String,
}

/// File-content cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCacheConfig {
    /// Maximum number of inodes waiting in the content flush backlog.
    #[serde(default = "default_max_backlog")]
    pub max_backlog: usize,
}

fn default_max_backlog() -> usize {
    1000
}

fn default_kv_prefix() -> String {
    "metafs".into()
}

fn default_inode_tag() -> String {
    "i".into()
}

fn default_counter_key() -> String {
    "nextinode".into()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_backlog: default_max_backlog(),
            kv_prefix: default_kv_prefix(),
            inode_tag: default_inode_tag(),
            counter_key: default_counter_key(),
        }
    }
}

impl Default for DataCacheConfig {
    fn default() -> Self {
        Self {
            max_backlog: default_max_backlog(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.max_backlog, 1000);
        assert_eq!(cfg.kv_prefix, "metafs");
        assert_eq!(cfg.inode_tag, "i");
        assert_eq!(cfg.counter_key, "nextinode");
        assert_eq!(DataCacheConfig::default().max_backlog, 1000);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let cfg: CacheConfig = serde_json::from_str(r#"{"max_backlog": 4}"#).unwrap();
        assert_eq!(cfg.max_backlog, 4);
        assert_eq!(cfg.inode_tag, "i");
    }
}
