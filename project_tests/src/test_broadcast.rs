//! # Broadcast Fan-out Integration Tests
//!
//! Several subscriber channels against one server: every open channel gets
//! exactly one `waste` event per ingestion, and a broken channel never
//! affects the others or the HTTP response.

mod support;

use std::time::Duration;

use futures_util::SinkExt;
use reqwest::StatusCode;
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::Message;

use green_common::retrieve::DownstreamServices;
use support::{eventually, metal_entry, next_json, spawn_server, subscribe};

#[tokio::test]
async fn one_event_per_channel() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let client = reqwest::Client::new();
    let mut a = subscribe(&server.ws_url()).await;
    let mut b = subscribe(&server.ws_url()).await;

    let body: Value = client
        .post(server.http("/waste-logs"))
        .json(&metal_entry())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = body["log"]["id"].clone();

    for ws in [&mut a, &mut b] {
        let event = next_json(ws).await;
        assert_eq!(event["type"], "waste");
        assert_eq!(event["payload"]["id"], id);
        assert_eq!(event["payload"]["materialType"], "Metal");
        assert_eq!(event["payload"]["quantity"], 500.0);
    }

    // Exactly one: a marker published afterwards is the very next frame.
    client
        .post(server.http("/publish"))
        .json(&serde_json::json!({"marker": true}))
        .send()
        .await
        .unwrap();
    for ws in [&mut a, &mut b] {
        let event = next_json(ws).await;
        assert_eq!(event["payload"]["marker"], true);
    }
}

#[tokio::test]
async fn failed_channel_is_isolated() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let client = reqwest::Client::new();
    let mut healthy = subscribe(&server.ws_url()).await;

    // A subscriber whose queue is gone: every send to it fails.
    drop(server.state.dispatcher.add_client("doomed"));
    assert_eq!(server.state.dispatcher.client_count(), 2);

    let resp = client
        .post(server.http("/waste-logs"))
        .json(&metal_entry())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let event = next_json(&mut healthy).await;
    assert_eq!(event["type"], "waste");
    assert_eq!(server.state.dispatcher.client_count(), 1);
}

#[tokio::test]
async fn closed_socket_is_removed_and_others_still_receive() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let client = reqwest::Client::new();
    let mut stays = subscribe(&server.ws_url()).await;
    let mut leaves = subscribe(&server.ws_url()).await;

    leaves.send(Message::Close(None)).await.unwrap();
    drop(leaves);
    let dispatcher = server.state.dispatcher.clone();
    assert!(eventually(|| dispatcher.client_count() == 1).await);

    let resp = client
        .post(server.http("/waste-logs"))
        .json(&metal_entry())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(next_json(&mut stays).await["type"], "waste");
}

#[tokio::test]
async fn inbound_client_messages_are_ignored() {
    let server = spawn_server(DownstreamServices::disabled()).await;
    let client = reqwest::Client::new();
    let mut ws = subscribe(&server.ws_url()).await;

    ws.send(Message::Text("hello from the dashboard".into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.state.dispatcher.client_count(), 1);
    assert!(server.state.store.is_empty());

    client
        .post(server.http("/waste-logs"))
        .json(&metal_entry())
        .send()
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "waste");
}
