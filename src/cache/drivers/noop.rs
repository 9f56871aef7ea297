use async_trait::async_trait;
use bytes::Bytes;

use crate::cache::driver::{CacheDriver, DriverKind, Existence};
use crate::cache::keys::{CacheKey, KeySet};

/// Stand-in used when nothing usable is registered. Never available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDriver;

#[async_trait]
impl CacheDriver for NoopDriver {
    fn id(&self) -> &'static str {
        "noop"
    }

    fn label(&self) -> &str {
        "Disabled"
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Noop
    }

    async fn probe(&self) -> bool {
        false
    }

    async fn raw_exists(&self, _key: &CacheKey) -> Existence {
        Existence::NotCached
    }

    async fn raw_get(&self, _key: &CacheKey) -> Option<Bytes> {
        None
    }

    async fn raw_set(&self, _key: &CacheKey, _value: Bytes) -> bool {
        false
    }

    async fn raw_delete(&self, _keys: &KeySet) -> bool {
        true
    }
}
