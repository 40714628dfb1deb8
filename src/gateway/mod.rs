//! HTTP gateway for static exports.
//!
//! - `POST /build`: export `{"userFiles": {..}}` and return `{"buildId": ..}`
//! - `GET /preview/{build_id}[/{*path}]`: replay a stored build
//! - `DELETE /preview/{build_id}`: drop a stored build

pub mod preview;

use crate::config::GatewayConfig;
use crate::export::StaticExporter;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub exporter: Arc<StaticExporter>,
}

pub fn build_router(exporter: StaticExporter, config: &GatewayConfig) -> Router {
    let state = AppState {
        exporter: Arc::new(exporter),
    };

    Router::new()
        .route("/build", post(preview::handle_build))
        .route(
            "/preview/{build_id}",
            get(preview::handle_preview_index).delete(preview::handle_delete_build),
        )
        .route("/preview/{build_id}/{*path}", get(preview::handle_preview_file))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(exporter: StaticExporter, config: &GatewayConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind gateway on {}: {e}", config.bind))?;
    let local = listener.local_addr()?;
    tracing::info!("Preview gateway listening on http://{local}");

    axum::serve(listener, build_router(exporter, config))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl-C: {e}");
            }
        })
        .await
        .map_err(|e| anyhow::anyhow!("Gateway server error: {e}"))
}
