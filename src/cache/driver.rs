//! Backend driver contract and the shared wrapper every driver runs behind.
//!
//! Concrete drivers only implement the `raw_*` primitives. [`CacheBackend`]
//! adds the behavior that must be identical across drivers: availability
//! gating, key normalization and the purge hooks.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::histogram;
use serde::Serialize;
use tracing::debug;

use super::hooks::{CacheHooks, FlushDecision};
use super::keys::{CacheKey, KeySet};

const METRIC_DRIVER_OP_MS: &str = "cachegate_driver_op_ms";

/// Family a driver belongs to; the decision engine keys header sets off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    ProxyCache,
    KeyValue,
    Filesystem,
    Noop,
}

/// Tri-state answer of an existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Existence {
    Cached,
    NotCached,
    /// The backend cannot answer; callers should assume the page is cached.
    Indeterminate,
}

impl Existence {
    pub fn assume_cached(self) -> bool {
        !matches!(self, Existence::NotCached)
    }
}

/// What hooks and listings get to know about a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverInfo {
    pub id: String,
    pub label: String,
    pub kind: DriverKind,
}

#[async_trait]
pub trait CacheDriver: Send + Sync {
    /// Stable identifier used by `engine.type`.
    fn id(&self) -> &'static str;

    fn label(&self) -> &str;

    fn kind(&self) -> DriverKind;

    /// Whether the backend is usable right now. Must never fail loudly.
    async fn probe(&self) -> bool;

    async fn raw_exists(&self, _key: &CacheKey) -> Existence {
        Existence::Indeterminate
    }

    async fn raw_get(&self, key: &CacheKey) -> Option<Bytes>;

    async fn raw_set(&self, key: &CacheKey, value: Bytes) -> bool;

    /// Bulk delete; reports success only if every key was removed.
    async fn raw_delete(&self, keys: &KeySet) -> bool;

    fn info(&self) -> DriverInfo {
        DriverInfo {
            id: self.id().to_string(),
            label: self.label().to_string(),
            kind: self.kind(),
        }
    }
}

/// Result of a purge, kept detailed for logs and metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeOutcome {
    Unavailable,
    Empty,
    Vetoed,
    Executed { keys: KeySet, success: bool },
}

impl PurgeOutcome {
    /// Everything except a failed driver call counts as success.
    pub fn succeeded(&self) -> bool {
        match self {
            PurgeOutcome::Executed { success, .. } => *success,
            _ => true,
        }
    }

    /// Keys that actually reached the driver and were removed.
    pub fn purged_keys(&self) -> Option<&KeySet> {
        match self {
            PurgeOutcome::Executed {
                keys,
                success: true,
            } => Some(keys),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PurgeOutcome::Unavailable => "unavailable",
            PurgeOutcome::Empty => "empty",
            PurgeOutcome::Vetoed => "vetoed",
            PurgeOutcome::Executed { success: true, .. } => "purged",
            PurgeOutcome::Executed { success: false, .. } => "failed",
        }
    }
}

/// Result of a full flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// A flush-all listener took over.
    Handled(bool),
    /// Nobody had an opinion, so the site wildcard was purged.
    Fallback(PurgeOutcome),
}

impl FlushOutcome {
    pub fn succeeded(&self) -> bool {
        match self {
            FlushOutcome::Handled(success) => *success,
            FlushOutcome::Fallback(outcome) => outcome.succeeded(),
        }
    }

    /// Whether the namespace was actually cleared (not merely vacuously ok).
    pub fn cleared(&self) -> bool {
        match self {
            FlushOutcome::Handled(success) => *success,
            FlushOutcome::Fallback(outcome) => outcome.purged_keys().is_some(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FlushOutcome::Handled(true) => "handled",
            FlushOutcome::Handled(false) => "refused",
            FlushOutcome::Fallback(outcome) => outcome.label(),
        }
    }
}

/// A driver plus the per-request policy it runs under.
#[derive(Clone)]
pub struct CacheBackend {
    driver: Arc<dyn CacheDriver>,
    hooks: Arc<CacheHooks>,
    scheme_indifferent: bool,
    home: String,
}

impl CacheBackend {
    pub fn new(
        driver: Arc<dyn CacheDriver>,
        hooks: Arc<CacheHooks>,
        scheme_indifferent: bool,
        home: impl Into<String>,
    ) -> Self {
        Self {
            driver,
            hooks,
            scheme_indifferent,
            home: home.into(),
        }
    }

    pub fn driver(&self) -> &Arc<dyn CacheDriver> {
        &self.driver
    }

    pub fn info(&self) -> DriverInfo {
        self.driver.info()
    }

    pub async fn available(&self) -> bool {
        timed("probe", self.driver.probe()).await
    }

    /// Purge pipeline: availability, emptiness, hooks, normalization, delete.
    pub async fn delete_detailed(&self, keys: KeySet) -> PurgeOutcome {
        if !self.available().await {
            return PurgeOutcome::Unavailable;
        }
        if keys.is_empty() {
            return PurgeOutcome::Empty;
        }

        let info = self.info();
        let Some(filtered) = self.hooks.filter_keys(keys, &info) else {
            debug!(driver = %info.id, "Purge vetoed by key filter");
            return PurgeOutcome::Vetoed;
        };

        let normalized: KeySet = filtered
            .iter()
            .map(|key| key.normalized(self.scheme_indifferent))
            .collect();
        let success = timed("delete", self.driver.raw_delete(&normalized)).await;
        PurgeOutcome::Executed {
            keys: normalized,
            success,
        }
    }

    pub async fn delete(&self, keys: KeySet) -> bool {
        self.delete_detailed(keys).await.succeeded()
    }

    /// Unavailable backends report `NotCached`.
    pub async fn exists(&self, key: &CacheKey) -> Existence {
        if !self.available().await {
            return Existence::NotCached;
        }
        let key = key.normalized(self.scheme_indifferent);
        timed("exists", self.driver.raw_exists(&key)).await
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        if !self.available().await {
            return None;
        }
        let key = key.normalized(self.scheme_indifferent);
        timed("get", self.driver.raw_get(&key)).await
    }

    pub async fn set(&self, key: &CacheKey, value: Bytes) -> bool {
        if !self.available().await {
            return false;
        }
        let key = key.normalized(self.scheme_indifferent);
        timed("set", self.driver.raw_set(&key, value)).await
    }

    /// Full flush: listeners get first refusal, then the site wildcard goes.
    pub async fn flush(&self) -> FlushOutcome {
        match self.hooks.flush_all(&self.info()).await {
            FlushDecision::Handled(success) => FlushOutcome::Handled(success),
            FlushDecision::NoOpinion => {
                let wildcard = CacheKey::site_wildcard(&self.home);
                FlushOutcome::Fallback(self.delete_detailed(KeySet::from([wildcard])).await)
            }
        }
    }
}

async fn timed<F, T>(op: &'static str, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let started_at = Instant::now();
    let result = future.await;
    histogram!(METRIC_DRIVER_OP_MS, "op" => op).record(started_at.elapsed().as_secs_f64() * 1000.0);
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::cache::hooks::FlushAllListener;
    use crate::cache::keys::key_set;

    /// Records every raw call; availability is fixed at construction.
    struct Probe {
        available: bool,
        deleted: Mutex<Vec<KeySet>>,
    }

    impl Probe {
        fn new(available: bool) -> Arc<Self> {
            Arc::new(Self {
                available,
                deleted: Mutex::new(Vec::new()),
            })
        }

        fn deleted(&self) -> Vec<KeySet> {
            self.deleted.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl CacheDriver for Probe {
        fn id(&self) -> &'static str {
            "probe"
        }

        fn label(&self) -> &str {
            "Probe"
        }

        fn kind(&self) -> DriverKind {
            DriverKind::KeyValue
        }

        async fn probe(&self) -> bool {
            self.available
        }

        async fn raw_get(&self, key: &CacheKey) -> Option<Bytes> {
            Some(Bytes::from(key.as_str().to_string()))
        }

        async fn raw_set(&self, _key: &CacheKey, _value: Bytes) -> bool {
            true
        }

        async fn raw_delete(&self, keys: &KeySet) -> bool {
            self.deleted.lock().expect("lock").push(keys.clone());
            true
        }
    }

    fn backend(driver: Arc<Probe>, hooks: Arc<CacheHooks>) -> CacheBackend {
        CacheBackend::new(driver, hooks, true, "https://example.com")
    }

    #[tokio::test]
    async fn unavailable_driver_fails_closed() {
        let driver = Probe::new(false);
        let backend = backend(driver.clone(), Arc::new(CacheHooks::new()));
        let key = CacheKey::from("/a");

        assert!(backend.delete(key_set(["/a"])).await);
        assert_eq!(backend.get(&key).await, None);
        assert!(!backend.set(&key, Bytes::from_static(b"v")).await);
        assert_eq!(backend.exists(&key).await, Existence::NotCached);
        assert!(driver.deleted().is_empty());
    }

    #[tokio::test]
    async fn empty_and_vetoed_purges_succeed_without_driver_call() {
        let driver = Probe::new(true);
        let hooks = Arc::new(CacheHooks::new());
        hooks.add_key_filter(|keys, _| {
            let kept: KeySet = keys.into_iter().filter(|k| k.as_str() != "/secret").collect();
            Some(kept)
        });
        let backend = backend(driver.clone(), hooks);

        assert_eq!(backend.delete_detailed(KeySet::new()).await, PurgeOutcome::Empty);
        assert_eq!(
            backend.delete_detailed(key_set(["/secret"])).await,
            PurgeOutcome::Vetoed
        );
        assert!(driver.deleted().is_empty());
    }

    #[tokio::test]
    async fn keys_are_normalized_after_hooks() {
        let driver = Probe::new(true);
        let hooks = Arc::new(CacheHooks::new());
        hooks.add_key_filter(|mut keys, _| {
            keys.insert(CacheKey::from("https://example.com/feed"));
            Some(keys)
        });
        let backend = backend(driver.clone(), hooks);

        assert!(backend.delete(key_set(["https://example.com/post"])).await);
        assert_eq!(
            driver.deleted(),
            vec![key_set(["http://example.com/feed", "http://example.com/post"])]
        );
    }

    #[tokio::test]
    async fn get_sees_normalized_key() {
        let backend = backend(Probe::new(true), Arc::new(CacheHooks::new()));
        let value = backend
            .get(&CacheKey::from("https://example.com/x"))
            .await
            .expect("value");
        assert_eq!(value, Bytes::from_static(b"http://example.com/x"));
    }

    #[tokio::test]
    async fn flush_falls_back_to_site_wildcard() {
        let driver = Probe::new(true);
        let backend = backend(driver.clone(), Arc::new(CacheHooks::new()));

        let outcome = backend.flush().await;
        assert!(outcome.cleared());
        assert_eq!(driver.deleted(), vec![key_set(["http://example.com/*"])]);
    }

    struct TakeOver;

    #[async_trait]
    impl FlushAllListener for TakeOver {
        async fn on_flush_all(&self, _: FlushDecision, _: &DriverInfo) -> FlushDecision {
            FlushDecision::Handled(true)
        }
    }

    #[tokio::test]
    async fn flush_listener_gets_first_refusal() {
        let driver = Probe::new(true);
        let hooks = Arc::new(CacheHooks::new());
        hooks.add_flush_all_listener(Arc::new(TakeOver));
        let backend = backend(driver.clone(), hooks);

        assert_eq!(backend.flush().await, FlushOutcome::Handled(true));
        assert!(driver.deleted().is_empty());
    }

    #[test]
    fn indeterminate_is_treated_as_cached() {
        assert!(Existence::Indeterminate.assume_cached());
        assert!(Existence::Cached.assume_cached());
        assert!(!Existence::NotCached.assume_cached());
    }
}
