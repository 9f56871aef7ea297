mod admin;
mod error;
mod middleware;

pub use admin::{DriversResponse, FlushResponse, PurgeRequest, PurgeResponse};
pub use error::{ErrorReport, HttpError};
pub use middleware::log_responses;

use std::net::SocketAddr;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;

use crate::cache::{CacheState, track_flushes};

use super::error::InfraError;

/// Admin router; every request runs inside its own flush-queue scope.
pub fn build_admin_router(state: CacheState) -> Router {
    Router::new()
        .route("/health", get(admin::health))
        .route("/cache/purge", post(admin::purge))
        .route("/cache/flush", post(admin::flush))
        .route("/cache/drivers", get(admin::drivers))
        .route("/cache/flushed", get(admin::flushed))
        .route(
            "/cache/policy",
            get(admin::policy).post(admin::save_policy),
        )
        .with_state(state.clone())
        .layer(axum_middleware::from_fn_with_state(state, track_flushes))
        .layer(axum_middleware::from_fn(log_responses))
}

pub async fn serve(addr: SocketAddr, router: Router) -> Result<(), InfraError> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Admin listener ready");
    axum::serve(listener, router.into_make_service()).await?;
    Ok(())
}
