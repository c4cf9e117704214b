//! # Downstream Forwarding Integration Tests
//!
//! The server wired to fake AI, GIS and blockchain services built with axum.
//! Covers the ingestion forwarding policy and the pure proxies.

mod support;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use green_common::retrieve::DownstreamServices;
use green_common::utils::sha256_json;
use support::{downstream, metal_entry, next_json, spawn_fake, spawn_server, subscribe};

fn fake_ai(analyze_status: StatusCode) -> Router {
    Router::new()
        .route(
            "/ai/analyze",
            post(move |Json(entry): Json<Value>| async move {
                (
                    analyze_status,
                    Json(json!({
                        "status": "ok",
                        "site": entry["site"],
                        "recommendation": "Segregate metal offcuts for resale"
                    })),
                )
            }),
        )
        .route(
            "/ai/safety",
            get(|| async {
                Json(json!({
                    "status": "ok",
                    "alerts": [],
                    "predictions": {"risk_score": 0.5, "next_incident_estimate": "12 hours"}
                }))
            }),
        )
}

type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

async fn fake_anchor(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut seen = seen.lock().unwrap();
    seen.push((auth, body));
    Json(json!({
        "status": "ok",
        "transactionHash": format!("0x{:064x}", seen.len()),
        "blockNumber": 100 + seen.len() as u64
    }))
}

fn fake_chain(seen: Seen) -> Router {
    Router::new()
        .route("/blockchain/anchor-report", post(fake_anchor))
        .with_state(seen)
}

fn failing_chain() -> Router {
    Router::new().route(
        "/blockchain/anchor-report",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "error": "execution reverted"})),
            )
        }),
    )
}

async fn closed_port() -> SocketAddr {
    TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap()
}

async fn post_json(url: String, body: &Value) -> (StatusCode, Value) {
    let resp = reqwest::Client::new().post(url).json(body).send().await.unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

async fn get_json(url: String) -> Value {
    reqwest::get(url).await.unwrap().json().await.unwrap()
}

#[tokio::test]
async fn ai_analysis_is_embedded() {
    let ai = spawn_fake(fake_ai(StatusCode::OK)).await;
    let server = spawn_server(downstream(Some(ai), None, None)).await;

    let (status, body) = post_json(server.http("/waste-logs"), &metal_entry()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["analysis"]["status"], "ok");
    assert_eq!(body["analysis"]["site"], "Downtown Tower");
    assert_eq!(body["analysis"]["recommendation"], "Segregate metal offcuts for resale");
}

#[tokio::test]
async fn ai_error_reply_is_embedded_and_log_still_stored() {
    let ai = spawn_fake(fake_ai(StatusCode::INTERNAL_SERVER_ERROR)).await;
    let server = spawn_server(downstream(Some(ai), None, None)).await;
    let mut ws = subscribe(&server.ws_url()).await;

    let (status, body) = post_json(server.http("/waste-logs"), &metal_entry()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(
        body["analysis"],
        json!({"status": "error", "error": "AI service returned error"})
    );
    assert_eq!(server.state.store.len(), 1);
    assert_eq!(next_json(&mut ws).await["type"], "waste");
}

#[tokio::test]
async fn unreachable_ai_does_not_fail_ingestion() {
    let server = spawn_server(downstream(Some(closed_port().await), None, None)).await;

    let (status, body) = post_json(server.http("/waste-logs"), &metal_entry()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["analysis"]["status"], "error");
    assert!(body["log"]["id"].as_str().is_some_and(|id| !id.is_empty()));
}

#[tokio::test]
async fn safety_is_proxied_when_configured() {
    let ai = spawn_fake(fake_ai(StatusCode::OK)).await;
    let server = spawn_server(downstream(Some(ai), None, None)).await;

    let body = get_json(server.http("/ai/safety")).await;
    assert_eq!(body["predictions"]["next_incident_estimate"], "12 hours");
}

#[tokio::test]
async fn safety_falls_back_to_demo_payload() {
    for services in [
        DownstreamServices::disabled(),
        downstream(Some(closed_port().await), None, None),
    ] {
        let server = spawn_server(services).await;
        let body = get_json(server.http("/ai/safety")).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["alerts"][0]["message"], "Demo: No issues detected.");
        assert_eq!(body["alerts"][0]["confidence"], 0.95);
        assert_eq!(body["predictions"]["risk_score"], 0.12);
        assert_eq!(body["predictions"]["next_incident_estimate"], "48 hours");
    }
}

#[tokio::test]
async fn remote_gis_publish_reaches_its_subscribers() {
    let gis = spawn_server(DownstreamServices::disabled()).await;
    let server = spawn_server(downstream(None, Some(gis.addr), None)).await;
    let mut remote = subscribe(&format!("ws://{}/gis/ws", gis.addr)).await;

    let (status, body) = post_json(server.http("/waste-logs"), &metal_entry()).await;
    assert_eq!(status, StatusCode::OK);

    let event = next_json(&mut remote).await;
    assert_eq!(event["type"], "waste");
    assert_eq!(event["payload"]["id"], body["log"]["id"]);
    // The remote service only relays; its own store is untouched.
    assert!(gis.state.store.is_empty());
}

#[tokio::test]
async fn unreachable_gis_does_not_fail_ingestion() {
    let server = spawn_server(downstream(None, Some(closed_port().await), None)).await;
    let (status, body) = post_json(server.http("/waste-logs"), &metal_entry()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("analysis").is_none());
    assert_eq!(server.state.store.len(), 1);
}

#[tokio::test]
async fn anchoring_validates_before_anything_else() {
    let server = spawn_server(DownstreamServices::disabled()).await;

    for body in [json!({"hash": "abc"}), json!({"description": "Q3"}), json!({})] {
        let (status, reply) = post_json(server.http("/blockchain/anchor-report"), &body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            reply,
            json!({"status": "error", "error": "Hash and description are required"})
        );
    }
}

#[tokio::test]
async fn anchoring_without_service_is_unavailable() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let (status, reply) = post_json(
        server.http("/blockchain/anchor-report"),
        &json!({"hash": "abc", "description": "Q3"}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply["status"], "error");
}

#[tokio::test]
async fn anchoring_records_events_newest_first() {
    let seen: Seen = Arc::default();
    let chain = spawn_fake(fake_chain(seen.clone())).await;
    let server = spawn_server(downstream(None, None, Some(chain))).await;

    let (status, first) = post_json(
        server.http("/blockchain/anchor-report"),
        &json!({"hash": "deadbeef", "description": "Q3 waste summary"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "ok");
    assert_eq!(first["hash"], "deadbeef");
    assert_eq!(first["blockNumber"], 101);
    assert_eq!(first["transactionHash"].as_str().unwrap().len(), 66);

    let report = json!({"site": "Downtown Tower", "recycledKg": 500});
    let (_, second) = post_json(
        server.http("/blockchain/anchor-report"),
        &json!({"description": "Tower audit", "report": report.clone()}),
    )
    .await;
    assert_eq!(second["hash"], sha256_json(&report));

    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0.as_deref(), Some("Bearer test-token"));
        assert_eq!(seen[0].1, json!({"hash": "deadbeef", "description": "Q3 waste summary"}));
        assert_eq!(seen[1].1["hash"], sha256_json(&report));
    }

    let events = get_json(server.http("/blockchain/events")).await;
    assert_eq!(events["status"], "ok");
    let events = events["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], "ReportAnchored");
    assert_eq!(events[0]["description"], "Report anchored: Tower audit");
    assert_eq!(events[0]["blockNumber"], 102);
    assert_eq!(events[1]["txHash"], first["transactionHash"]);
}

#[tokio::test]
async fn failed_anchoring_is_bad_gateway() {
    let chain = spawn_fake(failing_chain()).await;
    let server = spawn_server(downstream(None, None, Some(chain))).await;

    let (status, reply) = post_json(
        server.http("/blockchain/anchor-report"),
        &json!({"hash": "abc", "description": "Q3"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply["status"], "error");
    assert!(reply["error"].as_str().unwrap().contains("execution reverted"));
    assert!(server.state.chain_events.recent().is_empty());
}

#[tokio::test]
async fn contracts_are_served() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let body = get_json(server.http("/blockchain/contracts")).await;
    assert_eq!(
        body,
        json!({
            "status": "ok",
            "contracts": {
                "milestonePayments": "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512",
                "incidentWasteLog": "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            }
        })
    );
}
