//! Extension points.
//!
//! Three ordered chains, each invoked in registration order:
//!
//! - **key filters** (`cache_flush`): rewrite or veto the key set of a purge.
//! - **flush-all listeners** (`cache_flush_all`): first refusal on a full flush.
//! - **engine form filters** (`cache_form_process_engine[_<driver>]`): rework
//!   the `engine` block of a submitted policy form.
//!
//! An empty chain is the identity transform.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::driver::DriverInfo;
use super::keys::KeySet;
use super::lock::{rw_read, rw_write};
use super::policy::PolicyStore;

const SOURCE: &str = "cache::hooks";

/// Outcome of a flush-all listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushDecision {
    /// Let the next listener, or the wildcard fallback, handle it.
    #[default]
    NoOpinion,
    /// The flush was performed (or refused) by a listener.
    Handled(bool),
}

/// Rewrites a purge key set; returning `None` or an empty set vetoes it.
pub type KeyFilter = Arc<dyn Fn(KeySet, &DriverInfo) -> Option<KeySet> + Send + Sync>;

/// Reworks the `engine` block of a submitted policy form.
pub type EngineFilter = Arc<dyn Fn(Value) -> Value + Send + Sync>;

#[async_trait]
pub trait FlushAllListener: Send + Sync {
    /// `current` is the decision reached by earlier listeners.
    async fn on_flush_all(&self, current: FlushDecision, driver: &DriverInfo) -> FlushDecision;
}

#[derive(Default)]
pub struct CacheHooks {
    key_filters: RwLock<Vec<KeyFilter>>,
    flush_all: RwLock<Vec<Arc<dyn FlushAllListener>>>,
    engine_filters: RwLock<Vec<(Option<String>, EngineFilter)>>,
}

impl CacheHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key_filter<F>(&self, filter: F)
    where
        F: Fn(KeySet, &DriverInfo) -> Option<KeySet> + Send + Sync + 'static,
    {
        rw_write(&self.key_filters, SOURCE, "add_key_filter").push(Arc::new(filter));
    }

    pub fn add_flush_all_listener(&self, listener: Arc<dyn FlushAllListener>) {
        rw_write(&self.flush_all, SOURCE, "add_flush_all_listener").push(listener);
    }

    /// Register an engine filter; `driver_id = None` runs for every driver.
    pub fn add_engine_filter<F>(&self, driver_id: Option<&str>, filter: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        rw_write(&self.engine_filters, SOURCE, "add_engine_filter")
            .push((driver_id.map(str::to_string), Arc::new(filter)));
    }

    /// Run the key filter chain. `None` means the purge was vetoed.
    pub fn filter_keys(&self, keys: KeySet, driver: &DriverInfo) -> Option<KeySet> {
        let filters = rw_read(&self.key_filters, SOURCE, "filter_keys").clone();
        filters
            .iter()
            .try_fold(keys, |keys, filter| filter(keys, driver))
            .filter(|keys| !keys.is_empty())
    }

    pub async fn flush_all(&self, driver: &DriverInfo) -> FlushDecision {
        let listeners = rw_read(&self.flush_all, SOURCE, "flush_all").clone();
        let mut decision = FlushDecision::NoOpinion;
        for listener in listeners {
            decision = listener.on_flush_all(decision, driver).await;
        }
        decision
    }

    /// Driver-specific filters run before the generic ones.
    pub fn process_engine(&self, driver_id: &str, engine: Value) -> Value {
        let filters = rw_read(&self.engine_filters, SOURCE, "process_engine").clone();
        let specific = filters
            .iter()
            .filter(|(target, _)| target.as_deref() == Some(driver_id));
        let generic = filters.iter().filter(|(target, _)| target.is_none());
        specific
            .chain(generic)
            .fold(engine, |engine, (_, filter)| filter(engine))
    }
}

/// Stamps a fresh etag whenever a full flush is about to happen.
///
/// Never claims the flush itself, so the wildcard fallback still runs.
pub struct EtagBump {
    policy: Arc<PolicyStore>,
}

impl EtagBump {
    pub fn new(policy: Arc<PolicyStore>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl FlushAllListener for EtagBump {
    async fn on_flush_all(&self, current: FlushDecision, driver: &DriverInfo) -> FlushDecision {
        if current == FlushDecision::Handled(false) {
            return current;
        }
        if let Err(err) = self.policy.bump_etag().await {
            warn!(error = %err, driver = %driver.id, "Failed to bump etag on flush");
        }
        current
    }
}
