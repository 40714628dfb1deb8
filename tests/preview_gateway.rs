#![cfg(unix)]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::collections::HashMap;
use tower::ServiceExt;
use zerobuild_preview::config::{ExportConfig, GatewayConfig};
use zerobuild_preview::export::StaticExporter;
use zerobuild_preview::gateway::build_router;
use zerobuild_preview::store::{BuildStore, StaticFile};

fn router(store: BuildStore, template: &std::path::Path) -> Router {
    let export = ExportConfig {
        template_dir: template.to_path_buf(),
        install_command: "true".to_string(),
        build_command: "mkdir -p out/about && cp page.html out/index.html && echo about > out/about/index.html"
            .to_string(),
        out_dir: "out".into(),
    };
    build_router(StaticExporter::new(export, store), &GatewayConfig::default())
}

fn seeded_store() -> BuildStore {
    let store = BuildStore::new();
    store.store(
        "abc",
        HashMap::from([
            ("index.html".to_string(), StaticFile::new("<h1>home</h1>", "text/html")),
            ("blog/index.html".to_string(), StaticFile::new("<h1>blog</h1>", "text/html")),
            ("app.css".to_string(), StaticFile::new("body{}", "text/css")),
        ]),
    );
    store
}

async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn preview_serves_index_for_empty_path() {
    let template = tempfile::tempdir().unwrap();
    let app = router(seeded_store(), template.path());

    let (status, content_type, body) = get(app, "/preview/abc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/html"));
    assert_eq!(body, "<h1>home</h1>");
}

#[tokio::test]
async fn preview_falls_back_to_directory_index() {
    let template = tempfile::tempdir().unwrap();
    let store = seeded_store();

    let (status, _, body) = get(router(store.clone(), template.path()), "/preview/abc/blog").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<h1>blog</h1>");

    let (status, content_type, _) =
        get(router(store, template.path()), "/preview/abc/app.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/css"));
}

#[tokio::test]
async fn unknown_build_and_file_are_not_found() {
    let template = tempfile::tempdir().unwrap();
    let store = seeded_store();

    let (status, _, body) = get(router(store.clone(), template.path()), "/preview/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Build not found");

    let (status, _, body) = get(router(store, template.path()), "/preview/abc/missing.js").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "File not found");
}

#[tokio::test]
async fn delete_removes_build() {
    let template = tempfile::tempdir().unwrap();
    let store = seeded_store();
    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri("/preview/abc")
            .body(Body::empty())
            .unwrap()
    };

    let response = router(store.clone(), template.path()).oneshot(delete()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(store.get("abc").is_none());

    let response = router(store, template.path()).oneshot(delete()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn build_then_replay() {
    let template = tempfile::tempdir().unwrap();
    std::fs::write(template.path().join("page.html"), "template").unwrap();
    let store = BuildStore::new();

    let body = serde_json::json!({ "userFiles": { "page.html": "<p>user</p>" } });
    let response = router(store.clone(), template.path())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/build")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let build_id = json["buildId"].as_str().unwrap().to_string();

    let app = router(store.clone(), template.path());
    let (status, _, body) = get(app, &format!("/preview/{build_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<p>user</p>");

    let app = router(store, template.path());
    let (_, _, body) = get(app, &format!("/preview/{build_id}/about")).await;
    assert_eq!(body.trim(), "about");
}

#[tokio::test]
async fn failed_build_returns_server_error() {
    let template = tempfile::tempdir().unwrap();
    // No page.html in the template, so the build command fails.
    let response = router(BuildStore::new(), template.path())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/build")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"userFiles":{}}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn slow_build_times_out_with_request_timeout() {
    let template = tempfile::tempdir().unwrap();
    let export = ExportConfig {
        template_dir: template.path().to_path_buf(),
        install_command: "true".to_string(),
        build_command: "sleep 30".to_string(),
        out_dir: "out".into(),
    };
    let gateway = GatewayConfig {
        request_timeout_secs: 1,
        ..GatewayConfig::default()
    };
    let app = build_router(StaticExporter::new(export, BuildStore::new()), &gateway);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/build")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"userFiles":{}}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
}
