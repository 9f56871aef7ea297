use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
    response::Response,
};
use bytes::Bytes;
use cachegate::cache::{
    ACTOR_HEADER, CacheHooks, CacheKey, CacheManager, CacheState, DriverRegistry, PolicyStore,
    drivers::MemoryDriver,
};
use cachegate::infra::http::build_admin_router;
use cachegate::infra::store::{MemoryOptionStore, MemoryScratchStore};
use serde_json::{Value, json};
use tower::ServiceExt;

fn setup() -> (Router, Arc<CacheManager>, Arc<MemoryDriver>) {
    let driver = Arc::new(MemoryDriver::new(16));
    let registry = Arc::new(DriverRegistry::new());
    registry.register(driver.clone());
    let policy = Arc::new(PolicyStore::new(Arc::new(MemoryOptionStore::with_tree(
        json!({ "engine": { "type": "memory" } }),
    ))));
    let manager = Arc::new(CacheManager::new(
        registry,
        policy,
        Arc::new(CacheHooks::new()),
        Arc::new(MemoryScratchStore::default()),
        "http://example.com",
    ));
    let router = build_admin_router(CacheState::new(manager.clone()));
    (router, manager, driver)
}

fn json_request(method: Method, uri: &str, actor: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json");
    if let Some(actor) = actor {
        builder = builder.header(ACTOR_HEADER, actor);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn empty_request(method: Method, uri: &str, actor: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
        builder = builder.header(ACTOR_HEADER, actor);
    }
    builder.body(Body::empty()).expect("request")
}

async fn call(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.expect("response")
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn seed(manager: &CacheManager, key: &str) {
    assert!(
        manager
            .set(&CacheKey::from(key), Bytes::from_static(b"page"))
            .await
    );
}

#[tokio::test]
async fn purge_then_report_for_the_same_actor() {
    let (router, manager, driver) = setup();
    seed(&manager, "http://example.com/a").await;
    seed(&manager, "http://example.com/b").await;

    let response = call(
        &router,
        json_request(
            Method::POST,
            "/cache/purge",
            Some("5"),
            json!({ "keys": ["http://example.com/a"] }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "outcome": "purged", "success": true, "purged": ["http://example.com/a"] })
    );
    assert_eq!(driver.len(), 1);

    let report = body_json(call(&router, empty_request(Method::GET, "/cache/flushed", Some("5"))).await).await;
    assert_eq!(
        report,
        json!({ "kind": "keys", "entries": [{ "label": "/a", "href": "http://example.com/a" }] })
    );

    let again = body_json(call(&router, empty_request(Method::GET, "/cache/flushed", Some("5"))).await).await;
    assert_eq!(again, json!({ "kind": "nothing" }));

    let other = body_json(call(&router, empty_request(Method::GET, "/cache/flushed", Some("6"))).await).await;
    assert_eq!(other, json!({ "kind": "nothing" }));
}

#[tokio::test]
async fn flush_clears_everything_and_is_reported_as_all() {
    let (router, manager, driver) = setup();
    seed(&manager, "http://example.com/").await;

    let response = call(&router, empty_request(Method::POST, "/cache/flush", Some("1"))).await;
    assert_eq!(
        body_json(response).await,
        json!({ "outcome": "purged", "success": true, "cleared": true })
    );
    assert!(driver.is_empty());

    let report = body_json(call(&router, empty_request(Method::GET, "/cache/flushed", Some("1"))).await).await;
    assert_eq!(report, json!({ "kind": "all" }));
}

#[tokio::test]
async fn flushed_report_requires_an_actor() {
    let (router, _, _) = setup();

    let response = call(&router, empty_request(Method::GET, "/cache/flushed", None)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn drivers_lists_registered_backends() {
    let (router, _, _) = setup();

    let body = body_json(call(&router, empty_request(Method::GET, "/cache/drivers", None)).await).await;

    assert_eq!(
        body,
        json!({
            "active": "In-memory store",
            "drivers": [{ "id": "memory", "label": "In-memory store", "available": true }]
        })
    );
}

#[tokio::test]
async fn submitted_policy_is_sanitized_and_served_back() {
    let (router, manager, _) = setup();

    let response = call(
        &router,
        json_request(
            Method::POST,
            "/cache/policy",
            None,
            json!({
                "engine": { "type": "unknown-driver" },
                "options": { "cookies": "session_.*\n, theme ,", "statuscode": "404" }
            }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let config = manager.policy().current().await;
    assert_eq!(config.engine_type(), Some("noop"));
    assert_eq!(config.excluded_cookies(), vec!["session_.*", "theme"]);
    assert_eq!(config.allowed_status_codes(), vec![404]);
    assert!(config.etag().is_some());

    let served = body_json(call(&router, empty_request(Method::GET, "/cache/policy", None)).await).await;
    assert_eq!(&served, config.tree());
}

#[tokio::test]
async fn health_reflects_the_active_driver() {
    let (router, _, _) = setup();

    let response = call(&router, empty_request(Method::GET, "/health", None)).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
