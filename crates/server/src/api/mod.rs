//! HTTP transport for the login flow.
//!
//! - `auth` - login, callback, refresh and code redemption (/api/v1/*)
//! - `health` - liveness and readiness probes (/healthz, /readyz)
//! - `error` - error rendering and request-scoped error logging
//! - `openapi` - OpenAPI/Utoipa configuration

pub mod auth;
pub mod error;
pub mod health;
pub mod openapi;

pub use auth::{AUTH_TAG, AuthAppState};
pub use health::MISC_TAG;

use crate::config::HttpConfig;
use axum::Router;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_redoc::{Redoc, Servable};

/// Builds the application router with docs at `/api-docs`.
pub fn app(state: AuthAppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .nest("/api/v1", auth::router(state.clone()))
        .merge(health::router(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Serves [`app`] until SIGINT/SIGTERM, then drains in-flight requests for at most
/// `shutdown_timeout_secs`.
#[tracing::instrument(skip_all, fields(addr = %http.listen_addr))]
pub async fn start_webserver(state: AuthAppState, http: &HttpConfig) -> color_eyre::Result<()> {
    let listener = tokio::net::TcpListener::bind(&http.listen_addr).await?;
    tracing::info!(addr = %http.listen_addr, "server listening");

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
    });

    let mut graceful = rx.clone();
    let server = axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = graceful.changed().await;
    });

    let mut drain = rx;
    let timeout = Duration::from_secs(http.shutdown_timeout_secs);
    tokio::select! {
        res = server.into_future() => {
            res.map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;
        }
        _ = async {
            let _ = drain.changed().await;
            tokio::time::sleep(timeout).await;
        } => {
            tracing::warn!(timeout_secs = http.shutdown_timeout_secs, "shutdown timed out, dropping in-flight requests");
        }
    }

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("graceful shutdown initiated");
}
