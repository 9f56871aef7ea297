//! Public cache-manipulation surface.
//!
//! [`CacheManager`] resolves the active driver against the current policy for
//! every call, so a configuration change takes effect on the next operation.
//! Driver trouble never surfaces as an error here: every operation degrades
//! to its documented safe default and is counted in metrics.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::decision::{DecisionEngine, RequestFacts, ResponseCycle};
use super::driver::{CacheBackend, Existence, FlushOutcome, PurgeOutcome};
use super::flush_queue::{self, FlushLog, FlushQueue, FlushReport};
use super::form::PolicyForm;
use super::hooks::{CacheHooks, EtagBump};
use super::keys::{CacheKey, KeySet};
use super::persist::{ActorId, ScratchStore, StoreError};
use super::policy::{PolicyConfig, PolicyStore};
use super::registry::{DriverRegistry, DriverSummary};

const METRIC_PURGE_TOTAL: &str = "cachegate_purge_total";
const METRIC_FLUSH_ALL_TOTAL: &str = "cachegate_flush_all_total";

pub struct CacheManager {
    registry: Arc<DriverRegistry>,
    policy: Arc<PolicyStore>,
    hooks: Arc<CacheHooks>,
    queue: FlushQueue,
    home: String,
}

impl CacheManager {
    /// Wire the pieces together. The etag listener is installed here, ahead
    /// of any listener the host adds later.
    pub fn new(
        registry: Arc<DriverRegistry>,
        policy: Arc<PolicyStore>,
        hooks: Arc<CacheHooks>,
        scratch: Arc<dyn ScratchStore>,
        home: impl Into<String>,
    ) -> Self {
        let home = home.into();
        hooks.add_flush_all_listener(Arc::new(EtagBump::new(policy.clone())));
        Self {
            registry,
            policy,
            hooks,
            queue: FlushQueue::new(scratch, home.clone()),
            home,
        }
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    pub fn hooks(&self) -> &Arc<CacheHooks> {
        &self.hooks
    }

    pub fn home(&self) -> &str {
        &self.home
    }

    /// Active driver wrapped with the current policy.
    pub async fn backend(&self) -> CacheBackend {
        let config = self.policy.current().await;
        self.backend_for(&config)
    }

    fn backend_for(&self, config: &PolicyConfig) -> CacheBackend {
        CacheBackend::new(
            self.registry.active(config),
            self.hooks.clone(),
            config.https_indifferent(),
            self.home.clone(),
        )
    }

    #[instrument(skip_all, fields(keys = keys.len()))]
    pub async fn purge_detailed(&self, keys: KeySet) -> PurgeOutcome {
        let backend = self.backend().await;
        let outcome = backend.delete_detailed(keys).await;

        counter!(METRIC_PURGE_TOTAL, "outcome" => outcome.label()).increment(1);
        match &outcome {
            PurgeOutcome::Executed { keys, success: true } => {
                flush_queue::record(keys);
                info!(driver = backend.driver().id(), purged = keys.len(), "Cache keys purged");
            }
            PurgeOutcome::Executed { keys, success: false } => {
                warn!(driver = backend.driver().id(), keys = keys.len(), "Cache purge failed");
            }
            _ => {}
        }
        outcome
    }

    pub async fn purge(&self, keys: KeySet) -> bool {
        self.purge_detailed(keys).await.succeeded()
    }

    #[instrument(skip_all)]
    pub async fn flush_all_detailed(&self) -> FlushOutcome {
        let backend = self.backend().await;
        let outcome = backend.flush().await;

        counter!(METRIC_FLUSH_ALL_TOTAL, "outcome" => outcome.label()).increment(1);
        if outcome.cleared() {
            flush_queue::record_all();
            info!(driver = backend.driver().id(), "Cache flushed");
        } else if !outcome.succeeded() {
            warn!(driver = backend.driver().id(), outcome = outcome.label(), "Cache flush failed");
        }
        outcome
    }

    pub async fn flush_all(&self) -> bool {
        self.flush_all_detailed().await.succeeded()
    }

    pub async fn exists(&self, key: &CacheKey) -> Existence {
        self.backend().await.exists(key).await
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.backend().await.get(key).await
    }

    pub async fn set(&self, key: &CacheKey, value: Bytes) -> bool {
        self.backend().await.set(key, value).await
    }

    pub async fn active_driver_label(&self) -> String {
        let config = self.policy.current().await;
        self.registry.active(&config).label().to_string()
    }

    pub async fn list_available_drivers(&self) -> Vec<DriverSummary> {
        self.registry.list_available().await
    }

    /// Engine compiled from the current policy and active driver.
    pub async fn decision_engine(&self) -> DecisionEngine {
        let config = self.policy.current().await;
        DecisionEngine::new(&config, self.registry.active(&config).kind())
    }

    pub async fn response_cycle(&self, facts: RequestFacts, status: u16) -> ResponseCycle {
        ResponseCycle::new(self.decision_engine().await, facts, status)
    }

    /// End-of-request hook: persist what `log` recorded for `actor`.
    pub async fn finalize(&self, actor: Option<&ActorId>, log: &FlushLog) -> Result<bool, StoreError> {
        self.queue.finalize(actor, log).await
    }

    /// Flushed pages for `actor`, preferring the running request's log.
    pub async fn flushed_report(&self, actor: &ActorId) -> Result<FlushReport, StoreError> {
        self.queue.take(actor, &flush_queue::current()).await
    }

    /// Sanitize and persist a submitted policy form.
    #[instrument(skip_all)]
    pub async fn save_form(&self, form: PolicyForm) -> Result<Arc<PolicyConfig>, StoreError> {
        let tree = form.into_tree(&self.registry, &self.hooks, OffsetDateTime::now_utc());
        self.policy.update(tree).await
    }
}
