//! Recent blockchain events, newest first, capped.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

/// How many events are kept.
pub const DEFAULT_CAPACITY: usize = 50;

/// One event shown on the dashboard's blockchain panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEvent {
    /// Event kind, e.g. `ReportAnchored`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable summary.
    pub description: String,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block number the transaction landed in.
    pub block_number: u64,
    /// When the event was recorded.
    #[serde(serialize_with = "millis_rfc3339")]
    pub timestamp: DateTime<Utc>,
}

fn millis_rfc3339<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Bounded, newest-first event log.
#[derive(Debug)]
pub struct ChainEventLog {
    events: Mutex<VecDeque<ChainEvent>>,
    capacity: usize,
}

impl Default for ChainEventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ChainEventLog {
    /// Log that keeps at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Records `event` at the front, dropping the oldest beyond capacity.
    pub fn record(&self, event: ChainEvent) {
        let mut events = self.events.lock().expect("Chain event lock poisoned");
        events.push_front(event);
        events.truncate(self.capacity);
    }

    /// Snapshot, newest first.
    pub fn recent(&self) -> Vec<ChainEvent> {
        self.events
            .lock()
            .expect("Chain event lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u64) -> ChainEvent {
        ChainEvent {
            kind: "ReportAnchored".into(),
            description: format!("Report anchored: #{n}"),
            tx_hash: format!("0x{n:x}"),
            block_number: n,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn newest_first_and_capped() {
        let log = ChainEventLog::with_capacity(3);
        for n in 1..=5 {
            log.record(event(n));
        }
        let blocks: Vec<_> = log.recent().into_iter().map(|e| e.block_number).collect();
        assert_eq!(blocks, [5, 4, 3]);
    }

    #[test]
    fn wire_shape() {
        let v = serde_json::to_value(event(9)).unwrap();
        assert_eq!(v["type"], "ReportAnchored");
        assert_eq!(v["txHash"], "0x9");
        assert_eq!(v["blockNumber"], 9);
        assert!(v["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
