//! Shared fixtures: a real server on an ephemeral port, fake downstream
//! services, and small WebSocket helpers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};

use green_common::retrieve::{ClientOptions, DownstreamConfig, DownstreamServices};
use green_common::server::{self, AppState, ContractAddresses};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const WAIT: Duration = Duration::from_secs(5);

/// A running server. Shut down on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn base(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn spawn_server(downstream: DownstreamServices) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(downstream, ContractAddresses::default());
    let (tx, rx) = oneshot::channel::<()>();

    tokio::spawn(server::serve(listener, state.clone(), async move {
        let _ = rx.await;
    }));

    TestServer {
        addr,
        state,
        shutdown: Some(tx),
    }
}

/// Serves `router` on an ephemeral port for the rest of the test.
pub async fn spawn_fake(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Downstream wiring for fakes; no retries so failures are immediate.
pub fn downstream(
    ai: Option<SocketAddr>,
    gis: Option<SocketAddr>,
    blockchain: Option<SocketAddr>,
) -> DownstreamServices {
    let url = |addr: Option<SocketAddr>| addr.map(|a| format!("http://{a}"));
    DownstreamServices::from_config(&DownstreamConfig {
        ai_base: url(ai),
        gis_base: url(gis),
        blockchain_base: url(blockchain),
        blockchain_token: Some("test-token".into()),
        options: ClientOptions {
            timeout: Duration::from_secs(2),
            max_retries: 0,
        },
    })
    .unwrap()
}

pub fn metal_entry() -> Value {
    json!({
        "materialType": "Metal",
        "quantity": 500,
        "site": "Downtown Tower",
        "disposalMethod": "Recycled"
    })
}

/// Connects and consumes the welcome frame.
pub async fn subscribe(url: &str) -> WsClient {
    let (mut ws, _) = tokio::time::timeout(WAIT, connect_async(url))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    ws
}

/// Next text frame as JSON.
pub async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("no frame in time")
            .expect("stream ended")
            .expect("read error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("frame is not JSON");
        }
    }
}

/// Polls `cond` until it holds or `WAIT` runs out.
pub async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
