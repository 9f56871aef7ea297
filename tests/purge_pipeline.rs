use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use cachegate::cache::{
    ActorId, CacheHooks, CacheKey, CacheManager, DriverInfo, DriverRegistry, Existence,
    FlushAllListener, FlushDecision, FlushOutcome, FlushReport, PolicyStore, PurgeOutcome,
    drivers::{MemoryDriver, NoopDriver},
    key_set, with_flush_log,
};
use cachegate::infra::store::{MemoryOptionStore, MemoryScratchStore};
use serde_json::{Value, json};

const HOME: &str = "https://example.com";

struct Harness {
    manager: CacheManager,
    driver: Arc<MemoryDriver>,
}

fn harness(tree: Value) -> Harness {
    let driver = Arc::new(MemoryDriver::new(64));
    let registry = Arc::new(DriverRegistry::new());
    registry.register(driver.clone());

    let policy = Arc::new(PolicyStore::new(Arc::new(MemoryOptionStore::with_tree(
        tree,
    ))));
    let manager = CacheManager::new(
        registry,
        policy,
        Arc::new(CacheHooks::new()),
        Arc::new(MemoryScratchStore::default()),
        HOME,
    );
    Harness { manager, driver }
}

fn memory_engine() -> Value {
    json!({ "engine": { "type": "memory" } })
}

async fn seed(manager: &CacheManager, keys: &[&str]) {
    for key in keys {
        assert!(
            manager
                .set(&CacheKey::from(*key), Bytes::from_static(b"<html>"))
                .await
        );
    }
}

#[tokio::test]
async fn exact_and_wildcard_purges_remove_matching_entries() {
    let Harness { manager, driver } = harness(memory_engine());
    seed(
        &manager,
        &[
            "http://example.com/",
            "http://example.com/blog/one",
            "http://example.com/blog/two",
            "http://example.com/about",
        ],
    )
    .await;
    assert_eq!(driver.len(), 4);

    assert!(manager.purge(key_set(["http://example.com/about"])).await);
    assert_eq!(
        manager.exists(&CacheKey::from("http://example.com/about")).await,
        Existence::NotCached
    );

    assert!(manager.purge(key_set(["http://example.com/blog/*"])).await);
    assert_eq!(driver.len(), 1);
    assert_eq!(
        manager.exists(&CacheKey::from("http://example.com/")).await,
        Existence::Cached
    );
}

#[tokio::test]
async fn secure_keys_fold_onto_plain_entries() {
    let Harness { manager, driver } = harness(memory_engine());
    seed(&manager, &["http://example.com/post"]).await;

    let outcome = manager
        .purge_detailed(key_set(["https://example.com/post"]))
        .await;

    assert_eq!(
        outcome,
        PurgeOutcome::Executed {
            keys: key_set(["http://example.com/post"]),
            success: true,
        }
    );
    assert!(driver.is_empty());
}

#[tokio::test]
async fn scheme_sensitive_policy_keeps_keys_apart() {
    let Harness { manager, driver } = harness(json!({
        "engine": { "type": "memory" },
        "general": { "https_indifferent": false }
    }));
    seed(&manager, &["http://example.com/post"]).await;

    assert!(manager.purge(key_set(["https://example.com/post"])).await);
    assert_eq!(driver.len(), 1);
}

#[tokio::test]
async fn empty_purge_succeeds_without_touching_the_driver() {
    let Harness { manager, driver } = harness(memory_engine());
    seed(&manager, &["http://example.com/a"]).await;

    let outcome = manager.purge_detailed(key_set(["", ""])).await;

    assert_eq!(outcome, PurgeOutcome::Empty);
    assert!(outcome.succeeded());
    assert_eq!(driver.len(), 1);
}

#[tokio::test]
async fn key_filters_rewrite_and_veto() {
    let Harness { manager, driver } = harness(memory_engine());
    seed(
        &manager,
        &["http://example.com/a", "http://example.com/private/b"],
    )
    .await;

    manager.hooks().add_key_filter(|keys, _| {
        Some(
            keys.into_iter()
                .filter(|key| !key.as_str().contains("/private/"))
                .collect(),
        )
    });

    let outcome = manager
        .purge_detailed(key_set(["http://example.com/private/b"]))
        .await;
    assert_eq!(outcome, PurgeOutcome::Vetoed);
    assert!(outcome.succeeded());
    assert_eq!(driver.len(), 2);

    let outcome = manager
        .purge_detailed(key_set([
            "http://example.com/a",
            "http://example.com/private/b",
        ]))
        .await;
    assert_eq!(outcome.purged_keys(), Some(&key_set(["http://example.com/a"])));
    assert_eq!(driver.len(), 1);
}

#[tokio::test]
async fn flush_all_falls_back_to_site_wildcard_and_bumps_etag() {
    let Harness { manager, driver } = harness(memory_engine());
    seed(
        &manager,
        &["http://example.com/", "http://example.com/x/y"],
    )
    .await;
    assert_eq!(manager.policy().current().await.etag(), None);

    let outcome = manager.flush_all_detailed().await;

    assert!(matches!(outcome, FlushOutcome::Fallback(_)));
    assert!(outcome.cleared());
    assert!(driver.is_empty());
    assert!(manager.policy().current().await.etag().is_some());
}

struct Claim {
    calls: AtomicUsize,
    success: bool,
}

#[async_trait]
impl FlushAllListener for Claim {
    async fn on_flush_all(&self, _current: FlushDecision, _driver: &DriverInfo) -> FlushDecision {
        self.calls.fetch_add(1, Ordering::SeqCst);
        FlushDecision::Handled(self.success)
    }
}

#[tokio::test]
async fn listener_that_handles_flush_skips_the_driver() {
    let Harness { manager, driver } = harness(memory_engine());
    seed(&manager, &["http://example.com/"]).await;
    let claim = Arc::new(Claim {
        calls: AtomicUsize::new(0),
        success: true,
    });
    manager.hooks().add_flush_all_listener(claim.clone());

    let outcome = manager.flush_all_detailed().await;

    assert_eq!(outcome, FlushOutcome::Handled(true));
    assert_eq!(claim.calls.load(Ordering::SeqCst), 1);
    assert_eq!(driver.len(), 1);
}

#[tokio::test]
async fn refused_flush_reports_failure() {
    let Harness { manager, .. } = harness(memory_engine());
    manager.hooks().add_flush_all_listener(Arc::new(Claim {
        calls: AtomicUsize::new(0),
        success: false,
    }));

    assert!(!manager.flush_all().await);
}

#[tokio::test]
async fn unavailable_driver_degrades_to_safe_defaults() {
    let registry = Arc::new(DriverRegistry::new());
    registry.register(Arc::new(NoopDriver));
    let manager = CacheManager::new(
        registry,
        Arc::new(PolicyStore::new(Arc::new(MemoryOptionStore::with_tree(
            json!({ "engine": { "type": "noop" } }),
        )))),
        Arc::new(CacheHooks::new()),
        Arc::new(MemoryScratchStore::default()),
        HOME,
    );
    let key = CacheKey::from("http://example.com/");

    assert_eq!(
        manager.purge_detailed(key_set(["http://example.com/"])).await,
        PurgeOutcome::Unavailable
    );
    assert!(manager.purge(key_set(["http://example.com/"])).await);
    assert_eq!(manager.exists(&key).await, Existence::NotCached);
    assert_eq!(manager.get(&key).await, None);
    assert!(!manager.set(&key, Bytes::from_static(b"x")).await);
}

#[tokio::test]
async fn purges_inside_a_scope_reach_the_actor_report() {
    let Harness { manager, .. } = harness(memory_engine());
    seed(&manager, &["http://example.com/a", "http://example.com/b"]).await;
    let actor = ActorId::new("7");

    let (purged, log) = with_flush_log(async {
        manager.purge(key_set(["http://example.com/a"])).await
            && manager.purge(key_set(["http://example.com/b"])).await
    })
    .await;
    assert!(purged);
    assert!(manager.finalize(Some(&actor), &log).await.expect("finalize"));

    let report = manager.flushed_report(&actor).await.expect("report");
    let FlushReport::Keys(entries) = report else {
        panic!("expected key report, got {report:?}");
    };
    let hrefs: Vec<_> = entries.iter().map(|entry| entry.href.as_str()).collect();
    assert_eq!(hrefs, ["http://example.com/a", "http://example.com/b"]);

    assert_eq!(
        manager.flushed_report(&actor).await.expect("second report"),
        FlushReport::Nothing
    );
}

#[tokio::test]
async fn full_flush_inside_a_scope_reports_all() {
    let Harness { manager, .. } = harness(memory_engine());
    seed(&manager, &["http://example.com/a"]).await;
    let actor = ActorId::new("9");

    let (flushed, log) = with_flush_log(manager.flush_all()).await;
    assert!(flushed);
    assert!(log.flushed_all());
    manager.finalize(Some(&actor), &log).await.expect("finalize");

    assert_eq!(
        manager.flushed_report(&actor).await.expect("report"),
        FlushReport::All
    );
}
