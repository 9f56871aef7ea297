//! Admin endpoints for purging, flushing and inspecting the cache layer.

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{
    Actor, CacheKey, CacheState, DriverSummary, FlushReport, PolicyForm, key_set,
};

use super::error::HttpError;

#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub outcome: &'static str,
    pub success: bool,
    pub purged: Vec<CacheKey>,
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub outcome: &'static str,
    pub success: bool,
    pub cleared: bool,
}

#[derive(Debug, Serialize)]
pub struct DriversResponse {
    pub active: String,
    pub drivers: Vec<DriverSummary>,
}

pub(super) async fn purge(
    State(state): State<CacheState>,
    Json(request): Json<PurgeRequest>,
) -> Json<PurgeResponse> {
    let outcome = state.manager.purge_detailed(key_set(request.keys)).await;
    let purged = outcome
        .purged_keys()
        .map(|keys| keys.iter().cloned().collect())
        .unwrap_or_default();

    Json(PurgeResponse {
        outcome: outcome.label(),
        success: outcome.succeeded(),
        purged,
    })
}

pub(super) async fn flush(State(state): State<CacheState>) -> Json<FlushResponse> {
    let outcome = state.manager.flush_all_detailed().await;
    Json(FlushResponse {
        outcome: outcome.label(),
        success: outcome.succeeded(),
        cleared: outcome.cleared(),
    })
}

pub(super) async fn drivers(State(state): State<CacheState>) -> Json<DriversResponse> {
    Json(DriversResponse {
        active: state.manager.active_driver_label().await,
        drivers: state.manager.list_available_drivers().await,
    })
}

pub(super) async fn flushed(
    State(state): State<CacheState>,
    actor: Option<Extension<Actor>>,
) -> Result<Json<FlushReport>, HttpError> {
    let Some(Extension(Actor(actor))) = actor else {
        return Err(HttpError::new(
            "infra::http::admin::flushed",
            StatusCode::BAD_REQUEST,
            "Missing actor",
            "x-cache-actor header is required",
        ));
    };

    state
        .manager
        .flushed_report(&actor)
        .await
        .map(Json)
        .map_err(|err| {
            HttpError::from_error(
                "infra::http::admin::flushed",
                StatusCode::INTERNAL_SERVER_ERROR,
                "Flush queue unavailable",
                &err,
            )
        })
}

pub(super) async fn policy(State(state): State<CacheState>) -> Json<Value> {
    Json(state.manager.policy().current().await.tree().clone())
}

pub(super) async fn save_policy(
    State(state): State<CacheState>,
    Json(form): Json<PolicyForm>,
) -> Result<Json<Value>, HttpError> {
    state
        .manager
        .save_form(form)
        .await
        .map(|config| Json(config.tree().clone()))
        .map_err(|err| {
            HttpError::from_error(
                "infra::http::admin::save_policy",
                StatusCode::INTERNAL_SERVER_ERROR,
                "Policy could not be saved",
                &err,
            )
        })
}

pub(super) async fn health(State(state): State<CacheState>) -> Response {
    if state.manager.backend().await.available().await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        HttpError::new(
            "infra::http::admin::health",
            StatusCode::SERVICE_UNAVAILABLE,
            "Cache driver unavailable",
            "active cache driver failed its probe",
        )
        .into_response()
    }
}
