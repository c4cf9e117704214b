//! # Live Pipeline Server
//!
//! The HTTP + WebSocket surface of the live waste-log pipeline.
//!
//! ## Routes:
//!
//! | method | path                        | purpose                                    |
//! |--------|-----------------------------|--------------------------------------------|
//! | GET    | `/ws`, `/gis/ws`            | subscriber channel                          |
//! | GET    | `/waste-logs`               | all stored entries                          |
//! | POST   | `/waste-logs`               | ingest one entry                            |
//! | POST   | `/publish`, `/gis/publish`  | broadcast an arbitrary payload              |
//! | GET    | `/ai/safety`                | AI safety proxy with demo fallback          |
//! | POST   | `/blockchain/anchor-report` | anchor a report hash                        |
//! | GET    | `/blockchain/events`        | recent anchoring events                     |
//! | GET    | `/blockchain/contracts`     | configured contract addresses               |
//! | GET    | `/health`                   | liveness and wiring summary                 |
//!
//! Every JSON reply carries `status: "ok" | "error"`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::core::{Dispatcher, WasteLogStore};
use crate::retrieve::DownstreamServices;

/// In-memory log of anchoring events.
pub mod chain_events;
/// HTTP handlers.
pub mod handlers;
/// Ingestion orchestration and forwarding policy.
pub mod ingest;
/// Subscriber channel handling.
pub mod socket;

pub use chain_events::{ChainEvent, ChainEventLog};
pub use ingest::{ingest, FailurePolicy, ForwardTarget, IngestOutcome, FORWARDING_POLICY};

/// Addresses of the externally deployed contracts, served as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAddresses {
    /// Milestone payments contract.
    pub milestone_payments: String,
    /// Incident and waste log contract.
    pub incident_waste_log: String,
}

impl Default for ContractAddresses {
    fn default() -> Self {
        Self {
            milestone_payments: "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512".to_string(),
            incident_waste_log: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
        }
    }
}

/// Shared state handed to every handler.
///
/// Each piece is constructed once at process start; tests build a fresh
/// `AppState` per case to stay isolated.
#[derive(Clone)]
pub struct AppState {
    /// The log of record.
    pub store: Arc<WasteLogStore>,
    /// Broadcast gateway for subscriber channels.
    pub dispatcher: Arc<Dispatcher>,
    /// External collaborators.
    pub downstream: Arc<DownstreamServices>,
    /// Recent anchoring events, newest first.
    pub chain_events: Arc<ChainEventLog>,
    /// Contract addresses for `/blockchain/contracts`.
    pub contracts: Arc<ContractAddresses>,
}

impl AppState {
    /// Fresh state around the given collaborators.
    pub fn new(downstream: DownstreamServices, contracts: ContractAddresses) -> Self {
        Self {
            store: Arc::new(WasteLogStore::new()),
            dispatcher: Arc::new(Dispatcher::new()),
            downstream: Arc::new(downstream),
            chain_events: Arc::new(ChainEventLog::default()),
            contracts: Arc::new(contracts),
        }
    }
}

/// Builds the router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(socket::ws_handler))
        .route("/gis/ws", get(socket::ws_handler))
        .route(
            "/waste-logs",
            get(handlers::list_logs).post(handlers::submit_log),
        )
        .route("/publish", post(handlers::publish))
        .route("/gis/publish", post(handlers::publish))
        .route("/ai/safety", get(handlers::ai_safety))
        .route("/blockchain/anchor-report", post(handlers::anchor_report))
        .route("/blockchain/events", get(handlers::chain_events))
        .route("/blockchain/contracts", get(handlers::contracts))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Serves the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("Green Track server listening on {}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
