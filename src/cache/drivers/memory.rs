//! In-process LRU key/value driver.

use std::num::NonZeroUsize;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;

use crate::cache::driver::{CacheDriver, DriverKind, Existence};
use crate::cache::keys::{CacheKey, KeySet};
use crate::cache::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::drivers::memory";

pub struct MemoryDriver {
    entries: RwLock<LruCache<CacheKey, Bytes>>,
}

impl MemoryDriver {
    /// A zero limit is bumped to one entry.
    pub fn new(limit: usize) -> Self {
        let capacity = NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheDriver for MemoryDriver {
    fn id(&self) -> &'static str {
        "memory"
    }

    fn label(&self) -> &str {
        "In-memory store"
    }

    fn kind(&self) -> DriverKind {
        DriverKind::KeyValue
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn raw_exists(&self, key: &CacheKey) -> Existence {
        if rw_read(&self.entries, SOURCE, "exists").contains(key) {
            Existence::Cached
        } else {
            Existence::NotCached
        }
    }

    async fn raw_get(&self, key: &CacheKey) -> Option<Bytes> {
        rw_write(&self.entries, SOURCE, "get").get(key).cloned()
    }

    async fn raw_set(&self, key: &CacheKey, value: Bytes) -> bool {
        rw_write(&self.entries, SOURCE, "set").put(key.clone(), value);
        true
    }

    async fn raw_delete(&self, keys: &KeySet) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "delete");
        for key in keys {
            if key.is_wildcard() {
                let matching: Vec<CacheKey> = entries
                    .iter()
                    .filter(|(candidate, _)| key.covers(candidate.as_str()))
                    .map(|(candidate, _)| candidate.clone())
                    .collect();
                for candidate in matching {
                    entries.pop(&candidate);
                }
            } else {
                entries.pop(key);
            }
        }
        true
    }
}
