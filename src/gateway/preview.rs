//! Build and replay handlers.

use super::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    #[serde(default)]
    pub user_files: HashMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResponse {
    pub build_id: String,
}

/// POST /build: run a static export and store the result.
pub async fn handle_build(
    State(state): State<AppState>,
    Json(request): Json<BuildRequest>,
) -> impl IntoResponse {
    match state.exporter.build(request.user_files).await {
        Ok(build_id) => Json(BuildResponse { build_id }).into_response(),
        Err(e) => {
            tracing::error!("Build error: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// GET /preview/{build_id}: the build's `index.html`.
pub async fn handle_preview_index(
    State(state): State<AppState>,
    Path(build_id): Path<String>,
) -> impl IntoResponse {
    serve_build_file(&state, &build_id, "")
}

/// GET /preview/{build_id}/{*path}
pub async fn handle_preview_file(
    State(state): State<AppState>,
    Path((build_id, path)): Path<(String, String)>,
) -> impl IntoResponse {
    serve_build_file(&state, &build_id, &path)
}

/// DELETE /preview/{build_id}
pub async fn handle_delete_build(
    State(state): State<AppState>,
    Path(build_id): Path<String>,
) -> StatusCode {
    if state.exporter.store().delete(&build_id) {
        tracing::info!(build_id = %build_id, "Deleted static build");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

fn serve_build_file(state: &AppState, build_id: &str, path: &str) -> axum::response::Response {
    let Some(build) = state.exporter.store().get(build_id) else {
        return (StatusCode::NOT_FOUND, "Build not found").into_response();
    };
    match build.resolve(path) {
        Some(file) => (
            [(header::CONTENT_TYPE, file.content_type.clone())],
            file.content.clone(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "File not found").into_response(),
    }
}
