//! HTTP handlers. Bodies are taken as raw bytes so that unparseable JSON is
//! reported in the pipeline's own error shape instead of axum's rejection text.

use axum::{body::Bytes, extract::State, Json};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::error::GreenError;
use crate::core::waste_log::WasteLogEntry;
use crate::retrieve::AnchorRequest;
use crate::server::chain_events::ChainEvent;
use crate::server::{ingest, AppState};
use crate::utils::sha256_json;

const ANCHOR_FIELDS_REQUIRED: &str = "Hash and description are required";

/// `GET /waste-logs`
pub async fn list_logs(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "logs": state.store.list(),
    }))
}

/// `POST /waste-logs`
pub async fn submit_log(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, GreenError> {
    let entry = WasteLogEntry::from_submission(&body).inspect_err(|e| {
        log::debug!("Rejected waste log submission: {}", e);
    })?;
    let outcome = ingest::ingest(&state, entry).await;
    Ok(Json(outcome.to_body()))
}

/// `POST /publish`: broadcast an arbitrary JSON payload as a `waste` event.
pub async fn publish(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, GreenError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| GreenError::MalformedInput(format!("Invalid JSON body: {e}")))?;
    let delivered = state.dispatcher.broadcast(payload);
    Ok(Json(json!({ "status": "ok", "delivered": delivered })))
}

/// `GET /ai/safety`: proxied when AI is configured, demo payload otherwise.
pub async fn ai_safety(State(state): State<AppState>) -> Json<Value> {
    match state.downstream.safety().await {
        Ok(report) => Json(report),
        Err(GreenError::NotConfigured(_)) => Json(demo_safety_report()),
        Err(e) => {
            log::warn!("AI safety proxy failed, serving demo payload: {}", e);
            Json(demo_safety_report())
        }
    }
}

/// Safety report served when the AI service cannot answer.
pub fn demo_safety_report() -> Value {
    json!({
        "status": "ok",
        "alerts": [{
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "type": "Info",
            "message": "Demo: No issues detected.",
            "confidence": 0.95
        }],
        "predictions": {
            "risk_score": 0.12,
            "next_incident_estimate": "48 hours"
        }
    })
}

#[derive(Debug, Deserialize)]
struct AnchorSubmission {
    hash: Option<String>,
    description: Option<String>,
    report: Option<Value>,
}

impl AnchorSubmission {
    /// Resolves the hash to anchor, hashing the report when no hash is given.
    fn into_request(self) -> Result<AnchorRequest, GreenError> {
        let description = self
            .description
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| GreenError::MalformedInput(ANCHOR_FIELDS_REQUIRED.into()))?;

        let hash = match (self.hash.filter(|h| !h.trim().is_empty()), self.report) {
            (Some(hash), _) => hash,
            (None, Some(report)) if !report.is_null() => sha256_json(&report),
            _ => return Err(GreenError::MalformedInput(ANCHOR_FIELDS_REQUIRED.into())),
        };

        Ok(AnchorRequest { hash, description })
    }
}

/// `POST /blockchain/anchor-report`
pub async fn anchor_report(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, GreenError> {
    let submission: AnchorSubmission = serde_json::from_slice(&body)
        .map_err(|_| GreenError::MalformedInput(ANCHOR_FIELDS_REQUIRED.into()))?;
    let request = submission.into_request()?;

    let receipt = state.downstream.anchor(&request).await.inspect_err(|e| {
        log::warn!("Anchoring {} failed: {}", request.hash, e);
    })?;

    log::info!(
        "Anchored report {} in tx {} (block {})",
        request.hash,
        receipt.transaction_hash,
        receipt.block_number
    );
    state.chain_events.record(ChainEvent {
        kind: "ReportAnchored".to_string(),
        description: format!("Report anchored: {}", request.description),
        tx_hash: receipt.transaction_hash.clone(),
        block_number: receipt.block_number,
        timestamp: Utc::now(),
    });

    Ok(Json(json!({
        "status": "ok",
        "transactionHash": receipt.transaction_hash,
        "blockNumber": receipt.block_number,
        "hash": request.hash,
    })))
}

/// `GET /blockchain/events`
pub async fn chain_events(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "events": state.chain_events.recent(),
    }))
}

/// `GET /blockchain/contracts`
pub async fn contracts(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "contracts": &*state.contracts,
    }))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "subscribers": state.dispatcher.client_count(),
        "logs": state.store.len(),
        "services": {
            "ai": state.downstream.has_ai(),
            "gis": state.downstream.has_gis(),
            "blockchain": state.downstream.has_blockchain(),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(v: Value) -> Result<AnchorRequest, GreenError> {
        serde_json::from_value::<AnchorSubmission>(v)
            .unwrap()
            .into_request()
    }

    #[test]
    fn explicit_hash_wins_over_report() {
        let req = submission(json!({
            "hash": "abc123",
            "description": "Q3 waste report",
            "report": {"total": 12}
        }))
        .unwrap();
        assert_eq!(req.hash, "abc123");
        assert_eq!(req.description, "Q3 waste report");
    }

    #[test]
    fn report_is_hashed_when_hash_missing() {
        let report = json!({"site": "Downtown Tower", "total": 500});
        let req = submission(json!({"description": "d", "report": report.clone()})).unwrap();
        assert_eq!(req.hash, sha256_json(&report));
        assert_eq!(req.hash.len(), 64);
    }

    #[test]
    fn missing_fields_are_rejected() {
        for body in [
            json!({"hash": "abc"}),
            json!({"description": "d"}),
            json!({"hash": "", "description": "d"}),
            json!({"hash": "abc", "description": "  "}),
        ] {
            let err = submission(body).unwrap_err();
            assert!(matches!(err, GreenError::MalformedInput(ref m) if m == ANCHOR_FIELDS_REQUIRED));
        }
    }

    #[test]
    fn demo_report_shape() {
        let v = demo_safety_report();
        assert_eq!(v["status"], "ok");
        assert_eq!(v["alerts"][0]["type"], "Info");
        assert_eq!(v["predictions"]["risk_score"], 0.12);
    }
}
