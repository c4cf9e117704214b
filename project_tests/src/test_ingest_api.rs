//! # Ingestion API Integration Tests
//!
//! Drives `POST /waste-logs`, `GET /waste-logs`, `POST /publish` and
//! `/health` over real HTTP against a server with no downstream services.

mod support;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};

use green_common::retrieve::DownstreamServices;
use support::{metal_entry, spawn_server, subscribe, next_json};

async fn post_log(client: &reqwest::Client, url: &str, body: &Value) -> (StatusCode, Value) {
    let resp = client.post(url).json(body).send().await.unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

fn parse_ts(v: &Value) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(v.as_str().expect("timestamp is a string"))
        .unwrap()
        .with_timezone(&Utc)
}

#[tokio::test]
async fn generated_id_is_stable_across_reads() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let client = reqwest::Client::new();

    let (status, body) = post_log(&client, &server.http("/waste-logs"), &metal_entry()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    let id = body["log"]["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert!(body.get("analysis").is_none());

    for _ in 0..3 {
        let list: Value = client
            .get(server.http("/waste-logs"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list["status"], "ok");
        assert_eq!(list["logs"].as_array().unwrap().len(), 1);
        assert_eq!(list["logs"][0]["id"], id.as_str());
    }
}

#[tokio::test]
async fn client_timestamp_is_overwritten() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let client = reqwest::Client::new();

    let mut entry = metal_entry();
    entry["timestamp"] = json!("1999-01-01T00:00:00Z");
    let before = Utc::now();
    let (status, body) = post_log(&client, &server.http("/waste-logs"), &entry).await;
    let after = Utc::now();

    assert_eq!(status, StatusCode::OK);
    let ts = parse_ts(&body["log"]["timestamp"]);
    assert!(ts >= before - chrono::Duration::milliseconds(5));
    assert!(ts <= after + chrono::Duration::milliseconds(5));
}

#[tokio::test]
async fn caller_id_is_kept() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let client = reqwest::Client::new();

    let mut entry = metal_entry();
    entry["id"] = json!("site-7-0001");
    let (_, body) = post_log(&client, &server.http("/waste-logs"), &entry).await;
    assert_eq!(body["log"]["id"], "site-7-0001");
}

#[tokio::test]
async fn untouched_form_fields_are_accepted() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let client = reqwest::Client::new();

    let form = json!({
        "materialType": "Wood",
        "quantity": 5,
        "date": "2024-03-01T10:00:00.000Z",
        "site": "Harbor Yard",
        "disposalMethod": "Recycled",
        "binId": "",
        "cause": "",
        "photo": null
    });
    let (status, body) = post_log(&client, &server.http("/waste-logs"), &form).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["log"]["site"], "Harbor Yard");
    assert!(body["log"].get("cause").is_none());
    assert!(body["log"].get("binId").is_none());
    assert_eq!(server.state.store.len(), 1);
}

#[tokio::test]
async fn malformed_bodies_are_rejected_without_storing() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let client = reqwest::Client::new();

    let bad_json = client
        .post(server.http("/waste-logs"))
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert_eq!(bad_json.status(), StatusCode::BAD_REQUEST);
    let body: Value = bad_json.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert!(body["error"].is_string());

    let mut unknown_material = metal_entry();
    unknown_material["materialType"] = json!("Unobtainium");
    let (status, body) = post_log(&client, &server.http("/waste-logs"), &unknown_material).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let mut negative = metal_entry();
    negative["quantity"] = json!(-3);
    let (status, _) = post_log(&client, &server.http("/waste-logs"), &negative).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_log(&client, &server.http("/waste-logs"), &json!([1, 2])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(server.state.store.is_empty());
}

#[tokio::test]
async fn end_to_end_metal_submission() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let client = reqwest::Client::new();
    let mut ws = subscribe(&server.ws_url()).await;

    let submitted_at = Utc::now();
    let (status, body) = post_log(&client, &server.http("/waste-logs"), &metal_entry()).await;
    assert_eq!(status, StatusCode::OK);

    let list: Value = client
        .get(server.http("/waste-logs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let stored = &list["logs"][0];
    assert_eq!(stored["materialType"], "Metal");
    assert_eq!(stored["quantity"], 500.0);
    assert_eq!(stored["site"], "Downtown Tower");
    assert_eq!(stored["disposalMethod"], "Recycled");
    assert_eq!(stored["id"], body["log"]["id"]);
    let ts = parse_ts(&stored["timestamp"]);
    assert!((ts - submitted_at).num_seconds().abs() <= 5);

    let event = next_json(&mut ws).await;
    assert_eq!(event["type"], "waste");
    assert_eq!(event["payload"]["id"], body["log"]["id"]);
    assert_eq!(event["payload"]["materialType"], "Metal");
    assert_eq!(event["payload"]["site"], "Downtown Tower");
}

#[tokio::test]
async fn publish_broadcasts_arbitrary_payload() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let client = reqwest::Client::new();
    let mut ws = subscribe(&server.ws_url()).await;

    let resp: Value = client
        .post(server.http("/publish"))
        .json(&json!({"note": "crane inspection"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["delivered"], 1);

    let event = next_json(&mut ws).await;
    assert_eq!(event, json!({"type": "waste", "payload": {"note": "crane inspection"}}));
    assert!(server.state.store.is_empty());
}

#[tokio::test]
async fn health_reports_wiring() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let client = reqwest::Client::new();
    let _ws = subscribe(&server.ws_url()).await;
    post_log(&client, &server.http("/waste-logs"), &metal_entry()).await;

    let health: Value = client
        .get(server.http("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["subscribers"], 1);
    assert_eq!(health["logs"], 1);
    assert_eq!(
        health["services"],
        json!({"ai": false, "gis": false, "blockchain": false})
    );
}
