//! Integration tests for data requests against a local axum server
//!
//! The server echoes the body and cookie it received, so each test can see what the
//! manager actually put on the wire.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use isomorph_core::config::CommonConfig;
use isomorph_runtime::error::RequestError;
use isomorph_runtime::render::extract_snapshot;
use isomorph_runtime::requests::Incoming;
use isomorph_runtime::{
    Context, ContextBuilder, Credentials, DataRequest, RawRequest, RequestManager,
    RequestOptions,
};
use isomorph_testing::RecordingSink;
use isomorph_testing::helpers::server_app;
use serde_json::{Value, json};

// ============================================================================
// Test Fixtures
// ============================================================================

async fn echo(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    let cookie = headers
        .get("cookie")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    Json(json!({"data": {"cookie": cookie, "body": body}}))
}

async fn plain() -> Json<Value> {
    Json(json!({"data": null, "total": 2}))
}

async fn spawn_backend() -> SocketAddr {
    let router = Router::new()
        .route("/api/echo", post(echo))
        .route("/api/plain", post(plain))
        .route("/api/gone", get(|| async { StatusCode::GONE }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A page request for `/` arriving at `host` with a session cookie.
fn page_request(host: &str) -> RawRequest {
    RawRequest::get("/")
        .with_header("host", host)
        .with_header("cookie", "session=abc")
}

/// A body-less `GET` with the JSON headers.
fn get_request(url: &str) -> DataRequest {
    DataRequest::new(
        url,
        RequestOptions {
            body: None,
            ..RequestOptions::default().with_method(Method::GET)
        },
    )
}

fn context(host: &str) -> Context {
    ContextBuilder::new(CommonConfig::default())
        .normalize(page_request(host), RecordingSink::new().sink())
}

// ============================================================================
// Sending through the application
// ============================================================================

#[tokio::test]
async fn named_request_lands_in_the_snapshot() {
    let addr = spawn_backend().await;
    let manager = Arc::new(RequestManager::new().unwrap());
    manager.set_new_request(
        "echo",
        RequestManager::create_request("/api/echo", json!({"page": 1})),
    );

    let mut app = server_app();
    let sender = Arc::clone(&manager);
    app.use_fn(move |ctx: &mut Context, next| {
        let sender = Arc::clone(&sender);
        Box::pin(async move {
            sender.send(ctx, "echo").await?;
            next.run(ctx).await;
            Ok(())
        })
    });

    let sink = RecordingSink::new();
    app.handle(page_request(&addr.to_string()), sink.sink()).await;

    assert_eq!(sink.status(), Some(200));
    let snapshot = extract_snapshot(&sink.body().unwrap(), "test").unwrap();
    assert_eq!(
        snapshot["res"]["responses"],
        json!({"cookie": "session=abc", "body": {"page": 1}})
    );
}

#[tokio::test]
async fn failed_request_renders_the_error_page() {
    let addr = spawn_backend().await;
    let manager = Arc::new(RequestManager::new().unwrap());
    manager.set_new_request("gone", get_request("/api/gone"));

    let mut app = server_app();
    let sender = Arc::clone(&manager);
    app.use_fn(move |ctx: &mut Context, next| {
        let sender = Arc::clone(&sender);
        Box::pin(async move {
            sender.send(ctx, "gone").await?;
            next.run(ctx).await;
            Ok(())
        })
    });

    let sink = RecordingSink::new();
    app.handle(page_request(&addr.to_string()), sink.sink()).await;

    assert_eq!(sink.status(), Some(500));
    assert!(sink.body().unwrap().contains("isomorph-error"));
}

// ============================================================================
// Fetching
// ============================================================================

#[tokio::test]
async fn cookies_stay_with_their_origin() {
    let addr = spawn_backend().await;
    let manager = RequestManager::new().unwrap();
    let target = format!("http://{addr}/api/echo");
    let foreign = context("shop.test");

    let same_origin = RequestManager::create_request(target.clone(), json!({}));
    let answer = manager.fetch(Incoming::of(&foreign), &same_origin).await.unwrap();
    assert_eq!(answer["cookie"], "");

    let mut included = same_origin.clone();
    included.options = included.options.with_credentials(Credentials::Include);
    let answer = manager.fetch(Incoming::of(&foreign), &included).await.unwrap();
    assert_eq!(answer["cookie"], "session=abc");

    let home = context(&addr.to_string());
    let mut omitted = same_origin.clone();
    omitted.options = omitted.options.with_credentials(Credentials::Omit);
    let answer = manager.fetch(Incoming::of(&home), &omitted).await.unwrap();
    assert_eq!(answer["cookie"], "");
}

#[tokio::test]
async fn empty_data_member_is_kept() {
    let addr = spawn_backend().await;
    let manager = RequestManager::new().unwrap();
    let home = context(&addr.to_string());

    let request = RequestManager::create_request("/api/plain", json!({}));
    let answer = manager.fetch(Incoming::of(&home), &request).await.unwrap();

    assert_eq!(answer, json!({"data": null, "total": 2}));
}

#[tokio::test]
async fn error_status_and_unknown_names_are_errors() {
    let addr = spawn_backend().await;
    let manager = RequestManager::new().unwrap();
    let mut home = context(&addr.to_string());

    let gone = get_request("/api/gone");
    match manager.fetch(Incoming::of(&home), &gone).await {
        Err(RequestError::Status { status, .. }) => assert_eq!(status, 410),
        other => panic!("expected a status error, got {other:?}"),
    }

    assert!(matches!(
        manager.send(&mut home, "missing").await,
        Err(RequestError::UnknownRequest(name)) if name == "missing"
    ));
}
