use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::{error, warn};

use crate::cache::{ActorId, actor_from_headers};

use super::error::ErrorReport;

/// Log failed admin responses with the diagnostic chain their handler attached.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let actor = actor_from_headers(request.headers());
    let start = Instant::now();

    let mut response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let elapsed_ms = start.elapsed().as_millis();
    let (source, messages) = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => (report.source, report.messages),
        None => ("unknown", Vec::new()),
    };
    let detail = messages
        .first()
        .map_or("no diagnostic available", String::as_str);
    let actor = actor.as_ref().map_or("", ActorId::as_str);

    if status.is_server_error() {
        error!(
            target = "cachegate::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            actor,
            elapsed_ms,
            source,
            detail,
            chain = ?messages,
            "admin request failed",
        );
    } else {
        warn!(
            target = "cachegate::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            actor,
            elapsed_ms,
            source,
            detail,
            "admin request rejected",
        );
    }

    response
}
