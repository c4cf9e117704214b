//! Consumer-side view of the live log: newest first, one entry per id.

use chrono::{DateTime, Utc};

use crate::core::waste_log::WasteLogEntry;
use crate::ingestors::waste_wss::ConnectionStatus;

/// Merged list of entries, newest first.
#[derive(Debug, Clone, Default)]
pub struct LiveLogView {
    entries: Vec<WasteLogEntry>,
}

impl LiveLogView {
    /// Empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends `entry` unless an entry with the same id is already present.
    /// Entries without an id cannot be matched and are always kept.
    ///
    /// Returns whether the view changed.
    pub fn merge(&mut self, entry: WasteLogEntry) -> bool {
        if !entry.id.is_empty() && self.entries.iter().any(|e| e.id == entry.id) {
            return false;
        }
        self.entries.insert(0, entry);
        true
    }

    /// Merges a polled list given oldest first, as `GET /waste-logs` returns it.
    ///
    /// Returns how many entries were new.
    pub fn merge_all(&mut self, entries: impl IntoIterator<Item = WasteLogEntry>) -> usize {
        let mut added = 0;
        for entry in entries {
            if self.merge(entry) {
                added += 1;
            }
        }
        added
    }

    /// Entries, newest first.
    pub fn entries(&self) -> &[WasteLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a status indicator shows: connection phase and last data time.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedState {
    /// Phase of the real-time channel.
    pub status: ConnectionStatus,
    /// When the view last changed, from either source.
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            last_updated: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, qty: f64) -> WasteLogEntry {
        let mut e = WasteLogEntry::from_value(json!({
            "materialType": "Wood",
            "quantity": qty,
            "site": "Harbor Yard",
            "disposalMethod": "Disposed"
        }))
        .unwrap();
        e.id = id.to_string();
        e
    }

    #[test]
    fn same_id_twice_is_one_entry() {
        let mut view = LiveLogView::new();
        assert!(view.merge(entry("a", 1.0)));
        assert!(!view.merge(entry("a", 1.0)));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn newest_first() {
        let mut view = LiveLogView::new();
        view.merge(entry("a", 1.0));
        view.merge(entry("b", 2.0));
        let ids: Vec<_> = view.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn polled_list_overlapping_live_events() {
        let mut view = LiveLogView::new();
        view.merge(entry("b", 2.0));

        let added = view.merge_all(vec![entry("a", 1.0), entry("b", 2.0), entry("c", 3.0)]);

        assert_eq!(added, 2);
        let ids: Vec<_> = view.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn entries_without_id_are_kept() {
        let mut view = LiveLogView::new();
        view.merge(entry("", 1.0));
        view.merge(entry("", 1.0));
        assert_eq!(view.len(), 2);
    }
}
