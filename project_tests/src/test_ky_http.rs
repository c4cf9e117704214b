//! # `ky_http` Client Integration Tests
//!
//! Exercises `green_common::retrieve::ky_http::ApiClient` against a local
//! echo service: URL joining under a path prefix, custom headers plus the
//! bearer token, non-throwing non-2xx replies, JSON bodies, and retries of
//! transient failures.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{OriginalUri, State},
    http::{HeaderMap, StatusCode},
    routing::{any, get},
    Json, Router,
};
use reqwest::header::HeaderValue;
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};

use green_common::retrieve::{ApiClient, ClientOptions};
use support::spawn_fake;

async fn echo(OriginalUri(uri): OriginalUri, headers: HeaderMap, body: String) -> Json<Value> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    Json(json!({
        "path": uri.path(),
        "custom": header("x-custom-client"),
        "authorization": header("authorization"),
        "json": serde_json::from_str::<Value>(&body).ok(),
    }))
}

async fn flaky(State(calls): State<Arc<AtomicUsize>>) -> (StatusCode, Json<Value>) {
    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "busy"})))
    } else {
        (StatusCode::OK, Json(json!({"status": "ok"})))
    }
}

async fn echo_service(calls: Arc<AtomicUsize>) -> String {
    let router = Router::new()
        .route("/api/status/404", get(|| async { (StatusCode::NOT_FOUND, "no such thing") }))
        .route("/api/flaky", get(flaky))
        .route("/api/{*rest}", any(echo))
        .with_state(calls);
    format!("http://{}/api", spawn_fake(router).await)
}

#[tokio::test]
async fn joins_paths_under_prefix_with_headers_and_token() {
    let base = echo_service(Arc::default()).await;
    let api = ApiClient::new(&base, Some("test_secret_123".into())).unwrap();

    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("X-Custom-Client", HeaderValue::from_static("Green-Test-Suite"));
    let res = api
        .request::<Value, ()>(Method::GET, "/headers", Some(headers), None)
        .await
        .unwrap();

    assert!(res.success);
    let data = res.data.unwrap();
    assert_eq!(data["path"], "/api/headers");
    assert_eq!(data["custom"], "Green-Test-Suite");
    assert_eq!(data["authorization"], "Bearer test_secret_123");
}

#[tokio::test]
async fn non_2xx_is_not_an_error() {
    let base = echo_service(Arc::default()).await;
    let api = ApiClient::new(&base, None).unwrap();

    let res = api.get_json::<Value>("status/404").await.unwrap();

    assert!(!res.success);
    assert_eq!(res.status, 404);
    assert!(res.data.is_none());
    assert_eq!(res.error_body.as_deref(), Some("no such thing"));
}

#[tokio::test]
async fn posts_serialized_body() {
    #[derive(Serialize)]
    struct MyBody {
        message: String,
    }

    let base = echo_service(Arc::default()).await;
    let api = ApiClient::new(&base, None).unwrap();
    let body = MyBody {
        message: "Hello from Rust".into(),
    };

    let res = api.post_json::<Value, _>("post", &body).await.unwrap();

    assert!(res.success);
    assert_eq!(res.data.unwrap()["json"], json!({"message": "Hello from Rust"}));
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let base = echo_service(calls.clone()).await;
    let api = ApiClient::with_options(
        &base,
        None,
        ClientOptions {
            timeout: Duration::from_secs(5),
            max_retries: 1,
        },
    )
    .unwrap();

    let res = api.get_json::<Value>("flaky").await.unwrap();

    assert!(res.success);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn no_retries_means_one_attempt() {
    let calls = Arc::new(AtomicUsize::new(0));
    let base = echo_service(calls.clone()).await;
    let api = ApiClient::with_options(
        &base,
        None,
        ClientOptions {
            timeout: Duration::from_secs(5),
            max_retries: 0,
        },
    )
    .unwrap();

    let res = api.get_json::<Value>("flaky").await.unwrap();

    assert!(!res.success);
    assert_eq!(res.status, 503);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
