//! axum integration.
//!
//! - [`cache_headers_layer`] runs the decision engine over every response of
//!   a host router and writes the resulting cache headers.
//! - [`track_flushes`] scopes a flush log around a request and persists it
//!   for the acting user once the response is ready.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode, header::LOCATION},
    middleware::Next,
    response::Response,
};
use tracing::{instrument, warn};

use super::decision::RequestFacts;
use super::flush_queue::with_flush_log;
use super::persist::ActorId;
use super::service::CacheManager;

/// Header carrying the acting user's id.
pub const ACTOR_HEADER: &str = "x-cache-actor";

/// Shared cache state for middleware and admin handlers.
#[derive(Clone)]
pub struct CacheState {
    pub manager: Arc<CacheManager>,
}

impl CacheState {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }
}

/// Facts only the page handler knows; attach as a response extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageFacts {
    pub is_search: bool,
    pub password_required: bool,
    pub authenticated: bool,
}

/// Acting user, inserted into request extensions by [`track_flushes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub ActorId);

pub fn actor_from_headers(headers: &HeaderMap) -> Option<ActorId> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ActorId::new)
}

/// Emit cache headers for every response.
///
/// Responses start out as 200; a different final status counts as a status
/// transition and recomputes the headers. Redirects additionally pass through
/// the redirect interceptor.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn cache_headers_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let request_uri = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), |pq| pq.as_str().to_string());
    let cookie_names = RequestFacts::cookie_names_from(request.headers());
    let has_post_body = request.method() == Method::POST;

    let mut response = next.run(request).await;

    let page = response
        .extensions()
        .get::<PageFacts>()
        .copied()
        .unwrap_or_default();
    let facts = RequestFacts {
        is_search: page.is_search,
        password_required: page.password_required,
        authenticated: page.authenticated,
        has_post_body,
        cookie_names,
        request_uri,
    };

    let status = response.status().as_u16();
    let mut cycle = cache
        .manager
        .response_cycle(facts, StatusCode::OK.as_u16())
        .await;
    let headers = response.headers_mut();
    if cycle.change_status(status, headers).is_none() {
        cycle.decide_and_emit(headers);
    }

    if response.status().is_redirection() {
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        cycle.intercept_redirect(status, location.as_deref(), response.headers_mut());
    }

    response
}

/// Collect purges made while handling the request and persist them for the
/// actor named in [`ACTOR_HEADER`].
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn track_flushes(
    State(cache): State<CacheState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let actor = actor_from_headers(request.headers());
    if let Some(actor) = &actor {
        request.extensions_mut().insert(Actor(actor.clone()));
    }

    let (response, log) = with_flush_log(next.run(request)).await;

    if let Err(err) = cache.manager.finalize(actor.as_ref(), &log).await {
        warn!(error = %err, "Failed to persist flush queue");
    }
    response
}
