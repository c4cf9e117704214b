//! # Live Hook Integration Tests
//!
//! The client side against real and fake subscriber endpoints: decoding,
//! consumer-side deduplication, reconnect backoff, and the polling fallback.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::time::timeout;

use green_common::ingestors::{
    BackoffPolicy, ConnectionStatus, LiveLogView, PollingConfig, PollingFeed, WasteLiveHook,
};
use green_common::retrieve::DownstreamServices;
use support::{eventually, metal_entry, spawn_fake, spawn_server, WAIT};

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial: Duration::from_millis(25),
        max: Duration::from_millis(100),
        factor: 1.5,
    }
}

async fn post(url: String, body: &Value) {
    let resp = reqwest::Client::new().post(url).json(body).send().await.unwrap();
    assert!(resp.status().is_success());
}

#[tokio::test]
async fn same_id_twice_merges_once() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let view = Arc::new(Mutex::new(LiveLogView::new()));
    let delivered = Arc::new(AtomicUsize::new(0));

    let hook = {
        let view = view.clone();
        let delivered = delivered.clone();
        WasteLiveHook::connect(server.ws_url(), fast_backoff(), move |entry| {
            delivered.fetch_add(1, Ordering::SeqCst);
            view.lock().unwrap().merge(entry);
        })
    };
    let mut status = hook.status();
    timeout(WAIT, status.wait_for(|s| *s == ConnectionStatus::Connected))
        .await
        .unwrap()
        .unwrap();

    let mut entry = metal_entry();
    entry["id"] = json!("dup-1");
    post(server.http("/waste-logs"), &entry).await;
    post(server.http("/waste-logs"), &entry).await;
    // Non-entry payloads are not delivered.
    post(server.http("/publish"), &json!({"note": "not a waste log"})).await;

    assert!(eventually(|| delivered.load(Ordering::SeqCst) == 2).await);
    {
        let view = view.lock().unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view.entries()[0].id, "dup-1");
    }
    assert_eq!(server.state.store.len(), 2);

    hook.close().await;
    assert!(eventually(|| server.state.dispatcher.client_count() == 0).await);
}

async fn refuse_upgrade(State(attempts): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    attempts.fetch_add(1, Ordering::SeqCst);
    StatusCode::NOT_FOUND
}

#[tokio::test]
async fn failed_connects_back_off_within_bounds() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let addr = spawn_fake(
        Router::new()
            .route("/ws", get(refuse_upgrade))
            .with_state(attempts.clone()),
    )
    .await;

    let policy = BackoffPolicy {
        initial: Duration::from_millis(40),
        max: Duration::from_millis(200),
        factor: 2.0,
    };
    let hook = WasteLiveHook::connect(format!("ws://{addr}/ws"), policy, |_| {});
    let mut status = hook.status();

    let mut delays = Vec::new();
    while delays.len() < 6 {
        timeout(WAIT, status.changed()).await.unwrap().unwrap();
        let current = *status.borrow_and_update();
        assert_ne!(current, ConnectionStatus::Connected);
        if let ConnectionStatus::Disconnected { retry_in } = current {
            delays.push(retry_in);
        }
    }
    hook.close().await;

    let ms: Vec<u128> = delays.iter().map(|d| d.as_millis()).collect();
    assert!(attempts.load(Ordering::SeqCst) >= 5);
    assert_eq!(ms[0], 40, "{ms:?}");
    assert!(ms.iter().all(|d| [40, 80, 160, 200].contains(d)), "{ms:?}");
    assert!(ms.windows(2).all(|w| w[0] < w[1] || w[1] == 200), "{ms:?}");
    assert_eq!(*ms.last().unwrap(), 200, "{ms:?}");
}

async fn silent(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket| async move { while let Some(Ok(_)) = socket.recv().await {} })
}

fn counting_poll_target(hits: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route("/ws", get(silent))
        .route(
            "/waste-logs",
            get(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({
                        "status": "ok",
                        "logs": [{
                            "id": "polled-1",
                            "materialType": "Concrete",
                            "quantity": 12.5,
                            "site": "Harbor Yard",
                            "disposalMethod": "Disposed",
                            "timestamp": "2024-05-01T08:00:00.000Z"
                        }]
                    }))
                }
            }),
        )
}

#[tokio::test]
async fn silent_channel_falls_back_to_polling() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = spawn_fake(counting_poll_target(hits.clone())).await;

    let mut config = PollingConfig::new(format!("ws://{addr}/ws"), Some(format!("http://{addr}")));
    config.first_event_timeout = Duration::from_millis(200);
    config.poll_interval = Duration::from_millis(100);
    config.backoff = fast_backoff();
    let (feed, mut entries) = PollingFeed::start(config).unwrap();

    let entry = timeout(WAIT, entries.recv()).await.unwrap().unwrap();
    assert_eq!(entry.id, "polled-1");

    // Later polls return the same entry; the view keeps one.
    assert!(eventually(|| hits.load(Ordering::SeqCst) >= 3).await);
    assert_eq!(feed.view().len(), 1);
    let state = feed.state().borrow().clone();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert!(state.last_updated.is_some());

    feed.close().await;
}

#[tokio::test]
async fn real_time_event_prevents_polling() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let hits = Arc::new(AtomicUsize::new(0));
    let poll_addr = spawn_fake(counting_poll_target(hits.clone())).await;

    let mut config = PollingConfig::new(server.ws_url(), Some(format!("http://{poll_addr}")));
    config.first_event_timeout = Duration::from_millis(800);
    config.poll_interval = Duration::from_millis(50);
    let (feed, mut entries) = PollingFeed::start(config).unwrap();

    let mut state = feed.state();
    timeout(WAIT, state.wait_for(|s| s.status == ConnectionStatus::Connected))
        .await
        .unwrap()
        .unwrap();
    post(server.http("/waste-logs"), &metal_entry()).await;

    let entry = timeout(WAIT, entries.recv()).await.unwrap().unwrap();
    assert_eq!(entry.site, "Downtown Tower");

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(feed.view().len(), 1);

    feed.close().await;
}

fn stalled_poll_target(hits: Arc<AtomicUsize>) -> Router {
    Router::new().route("/ws", get(silent)).route(
        "/waste-logs",
        get(move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Json(json!({"status": "ok", "logs": []}))
            }
        }),
    )
}

#[tokio::test]
async fn close_does_not_wait_for_a_stalled_poll() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = spawn_fake(stalled_poll_target(hits.clone())).await;

    let mut config = PollingConfig::new(format!("ws://{addr}/ws"), Some(format!("http://{addr}")));
    config.first_event_timeout = Duration::from_millis(100);
    config.poll_interval = Duration::from_millis(50);
    config.backoff = fast_backoff();
    let (feed, _entries) = PollingFeed::start(config).unwrap();

    assert!(eventually(|| hits.load(Ordering::SeqCst) >= 1).await);
    timeout(Duration::from_secs(1), feed.close())
        .await
        .expect("close blocked on the in-flight poll");
    // The stalled request is never overlapped by a second one.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn live_entries_flow_while_a_poll_is_stalled() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let hits = Arc::new(AtomicUsize::new(0));
    let poll_addr = spawn_fake(stalled_poll_target(hits.clone())).await;

    let mut config = PollingConfig::new(server.ws_url(), Some(format!("http://{poll_addr}")));
    config.first_event_timeout = Duration::from_millis(100);
    config.poll_interval = Duration::from_millis(50);
    config.backoff = fast_backoff();
    let (feed, mut entries) = PollingFeed::start(config).unwrap();

    assert!(eventually(|| hits.load(Ordering::SeqCst) >= 1).await);
    post(server.http("/waste-logs"), &metal_entry()).await;

    let entry = timeout(Duration::from_secs(1), entries.recv())
        .await
        .expect("live entry held up by the poll")
        .unwrap();
    assert_eq!(entry.site, "Downtown Tower");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    feed.close().await;
}
