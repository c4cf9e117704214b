//! # Ingestion Orchestration
//!
//! Accepting a waste log is one write to the store of record followed by a
//! fixed set of side effects. The side effects and what happens when each one
//! fails are listed in [`FORWARDING_POLICY`]; nothing here can roll back or
//! delay the store write.
//!
//! The local broadcast runs while the store's write lock is held, so
//! subscribers see entries in exactly the order `GET /waste-logs` lists them.
//! The downstream targets run afterwards, outside the lock.

use chrono::Utc;
use serde_json::{json, Value};

use crate::core::error::GreenError;
use crate::core::waste_log::WasteLogEntry;
use crate::server::AppState;

/// A side effect attached to an accepted entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardTarget {
    /// Fan-out to every open subscriber channel of this process.
    LocalBroadcast,
    /// `POST {gis}/gis/publish`, detached from the request.
    GisPublish,
    /// `POST {ai}/ai/analyze`, awaited so the result can be returned.
    AiAnalysis,
}

/// How a failed side effect is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log at warn and carry on.
    LogOnly,
    /// Return `{status:"error", error}` as the response's `analysis`.
    EmbedAsAnalysis,
}

/// Side effects in execution order. An unconfigured target is skipped.
/// `LocalBroadcast` must stay first: it is fused with the append.
pub const FORWARDING_POLICY: [(ForwardTarget, FailurePolicy); 3] = [
    (ForwardTarget::LocalBroadcast, FailurePolicy::LogOnly),
    (ForwardTarget::GisPublish, FailurePolicy::LogOnly),
    (ForwardTarget::AiAnalysis, FailurePolicy::EmbedAsAnalysis),
];

/// What a side effect produced.
enum Forwarded {
    Delivered(usize),
    Detached,
    Analysis(Value),
}

/// Result of one ingestion.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// The entry as stored, with `id` and `timestamp` set.
    pub log: WasteLogEntry,
    /// AI analysis, or its embedded failure. `None` when AI is not configured.
    pub analysis: Option<Value>,
    /// How many subscriber channels the local broadcast reached.
    pub delivered: usize,
}

impl IngestOutcome {
    /// The `POST /waste-logs` response body.
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "status": "ok",
            "log": self.log.to_value(),
        });
        if let Some(analysis) = &self.analysis {
            body["analysis"] = analysis.clone();
        }
        body
    }
}

/// Stores `entry` and runs the forwarding policy over it.
pub async fn ingest(state: &AppState, entry: WasteLogEntry) -> IngestOutcome {
    let (stored, delivered) = state.store.admit_with(entry, Utc::now(), |stored| {
        state.dispatcher.broadcast(stored.to_value())
    });
    log::info!(
        "Stored waste log {} ({:?}, {} at {})",
        stored.id,
        stored.material_type,
        stored.quantity,
        stored.site
    );

    let payload = stored.to_value();
    let mut outcome = IngestOutcome {
        log: stored,
        analysis: None,
        delivered: 0,
    };

    for (target, policy) in FORWARDING_POLICY {
        match forward(state, target, &outcome.log, &payload, delivered).await {
            Ok(Forwarded::Delivered(n)) => outcome.delivered = n,
            Ok(Forwarded::Detached) => {}
            Ok(Forwarded::Analysis(value)) => outcome.analysis = Some(value),
            Err(GreenError::NotConfigured(_)) => {}
            Err(e) => match policy {
                FailurePolicy::LogOnly => {
                    log::warn!("{:?} failed for {}: {}", target, outcome.log.id, e);
                }
                FailurePolicy::EmbedAsAnalysis => {
                    log::warn!("{:?} failed for {}: {}", target, outcome.log.id, e);
                    outcome.analysis = Some(analysis_error(&e));
                }
            },
        }
    }

    outcome
}

async fn forward(
    state: &AppState,
    target: ForwardTarget,
    entry: &WasteLogEntry,
    payload: &Value,
    delivered: usize,
) -> Result<Forwarded, GreenError> {
    match target {
        // Already fanned out under the store lock.
        ForwardTarget::LocalBroadcast => Ok(Forwarded::Delivered(delivered)),
        ForwardTarget::GisPublish => {
            if !state.downstream.has_gis() {
                return Err(GreenError::NotConfigured("gis"));
            }
            let downstream = state.downstream.clone();
            let payload = payload.clone();
            let id = entry.id.clone();
            tokio::spawn(async move {
                if let Err(e) = downstream.publish_remote(&payload).await {
                    log::warn!("{:?} failed for {}: {}", ForwardTarget::GisPublish, id, e);
                }
            });
            Ok(Forwarded::Detached)
        }
        ForwardTarget::AiAnalysis => state.downstream.analyze(entry).await.map(Forwarded::Analysis),
    }
}

/// The `analysis` value reported when the AI call fails.
fn analysis_error(err: &GreenError) -> Value {
    let message = match err {
        GreenError::Downstream { message, .. } => message.clone(),
        other => other.to_string(),
    };
    json!({ "status": "error", "error": message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieve::DownstreamServices;
    use crate::server::ContractAddresses;

    fn entry() -> WasteLogEntry {
        WasteLogEntry::from_value(json!({
            "materialType": "Metal",
            "quantity": 500,
            "site": "Downtown Tower",
            "disposalMethod": "Recycled"
        }))
        .unwrap()
    }

    #[test]
    fn broadcast_runs_before_awaited_targets() {
        assert_eq!(FORWARDING_POLICY[0].0, ForwardTarget::LocalBroadcast);
        let ai = FORWARDING_POLICY
            .iter()
            .find(|(t, _)| *t == ForwardTarget::AiAnalysis)
            .unwrap();
        assert_eq!(ai.1, FailurePolicy::EmbedAsAnalysis);
    }

    #[tokio::test]
    async fn stores_and_broadcasts_without_downstreams() {
        let state = AppState::new(DownstreamServices::disabled(), ContractAddresses::default());
        let mut rx = state.dispatcher.add_client("c1");

        let outcome = ingest(&state, entry()).await;

        assert!(!outcome.log.id.is_empty());
        assert!(outcome.log.timestamp.is_some());
        assert_eq!(outcome.delivered, 1);
        assert!(outcome.analysis.is_none());
        assert_eq!(state.store.len(), 1);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.waste_entry().unwrap().id, outcome.log.id);

        let body = outcome.to_body();
        assert_eq!(body["status"], "ok");
        assert!(body.get("analysis").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_ingests_broadcast_in_store_order() {
        let state = AppState::new(DownstreamServices::disabled(), ContractAddresses::default());
        let mut rx = state.dispatcher.add_client("watcher");

        let tasks: Vec<_> = (0..400)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move { ingest(&state, entry()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut broadcast = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            broadcast.push(frame.waste_entry().unwrap().id);
        }
        let stored: Vec<_> = state.store.list().into_iter().map(|e| e.id).collect();
        assert_eq!(broadcast.len(), 400);
        assert_eq!(broadcast, stored);
    }

    #[test]
    fn analysis_error_keeps_downstream_message() {
        let err = GreenError::downstream("ai", "AI service returned error");
        assert_eq!(
            analysis_error(&err),
            json!({"status": "error", "error": "AI service returned error"})
        );
    }
}
