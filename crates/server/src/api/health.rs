//! Liveness and readiness probes.

use crate::api::auth::AuthAppState;
use crate::api::error::{ErrorBody, RequestMeta};
use axum::{extract::State, response::IntoResponse};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const MISC_TAG: &str = "Miscellaneous";

pub(crate) fn router(state: AuthAppState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(ready))
        .with_state(state)
}

/// Health check endpoint.
#[utoipa::path(
    method(get, head),
    path = "/healthz",
    tag = MISC_TAG,
    operation_id = "Health Check",
    summary = "Service liveness check",
    responses(
        (status = 200, description = "Service is running", body = str, content_type = "text/plain", example = "ok")
    )
)]
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness check: the database and the one-time code store must both answer.
#[utoipa::path(
    get,
    path = "/readyz",
    tag = MISC_TAG,
    operation_id = "Readiness Check",
    responses(
        (status = 200, description = "Dependencies reachable", body = str, content_type = "text/plain", example = "ok"),
        (status = 503, description = "A dependency is unavailable", body = ErrorBody)
    )
)]
pub async fn ready(State(state): State<AuthAppState>, meta: RequestMeta) -> impl IntoResponse {
    match state.service.ready().await {
        Ok(()) => Ok("ok"),
        Err(e) => Err(meta.fail(e)),
    }
}
