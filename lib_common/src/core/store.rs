//! # Waste Log Store
//!
//! An append-only, process-lifetime list of waste log entries. There is no
//! backing I/O: a restart loses everything, and nothing is ever updated or
//! removed once appended.
//!
//! The store is an explicit object owned by the server state and handed to
//! handlers through an `Arc`, so every test can start from a fresh instance.

use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::core::waste_log::WasteLogEntry;
use crate::utils::generate_log_id;

/// In-memory, insertion-ordered waste log.
#[derive(Debug, Default)]
pub struct WasteLogStore {
    logs: RwLock<Vec<WasteLogEntry>>,
}

impl WasteLogStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry` as-is to the end of the log.
    pub fn append(&self, entry: WasteLogEntry) {
        let mut logs = self.logs.write().expect("Store lock poisoned");
        logs.push(entry);
    }

    /// Stamps `entry` with the ingestion time, assigns an id if it has none,
    /// appends it and returns the stored record.
    ///
    /// Id assignment and the append happen under one write lock, so a freshly
    /// generated id never duplicates one already in the store. Caller-supplied
    /// ids are kept verbatim.
    pub fn admit(&self, entry: WasteLogEntry, now: DateTime<Utc>) -> WasteLogEntry {
        self.admit_with(entry, now, |_| ()).0
    }

    /// Like [`WasteLogStore::admit`], but runs `on_append` on the stored
    /// record before the write lock is released.
    ///
    /// Anything `on_append` emits is therefore ordered exactly like the log.
    /// It must not block or touch the store.
    pub fn admit_with<R>(
        &self,
        mut entry: WasteLogEntry,
        now: DateTime<Utc>,
        on_append: impl FnOnce(&WasteLogEntry) -> R,
    ) -> (WasteLogEntry, R) {
        let mut logs = self.logs.write().expect("Store lock poisoned");

        entry.timestamp = Some(now);
        if entry.id.is_empty() {
            let mut id = generate_log_id();
            while logs.iter().any(|e| e.id == id) {
                log::debug!("Generated id {} already taken, drawing another", id);
                id = generate_log_id();
            }
            entry.id = id;
        }

        logs.push(entry.clone());
        let emitted = on_append(&entry);
        (entry, emitted)
    }

    /// All entries in insertion order.
    pub fn list(&self) -> Vec<WasteLogEntry> {
        self.logs.read().expect("Store lock poisoned").clone()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.logs.read().expect("Store lock poisoned").len()
    }

    /// True when nothing has been logged yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when an entry with `id` is already stored.
    pub fn contains_id(&self, id: &str) -> bool {
        self.logs
            .read()
            .expect("Store lock poisoned")
            .iter()
            .any(|e| e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::waste_log::{DisposalMethod, MaterialType};

    fn entry(id: &str) -> WasteLogEntry {
        WasteLogEntry {
            id: id.to_string(),
            material_type: MaterialType::Wood,
            quantity: 12.0,
            date: None,
            site: "Greenwood Plaza".to_string(),
            disposal_method: DisposalMethod::Disposed,
            bin_id: None,
            cause: None,
            image_url: None,
            timestamp: None,
        }
    }

    #[test]
    fn list_preserves_insertion_order() {
        let store = WasteLogStore::new();
        store.append(entry("a"));
        store.append(entry("b"));
        store.append(entry("c"));

        let ids: Vec<_> = store.list().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn admit_assigns_id_and_overwrites_timestamp() {
        let store = WasteLogStore::new();
        let mut submitted = entry("");
        submitted.timestamp = Some(DateTime::from_timestamp(0, 0).unwrap());

        let now = Utc::now();
        let stored = store.admit(submitted, now);

        assert!(!stored.id.is_empty());
        assert_eq!(stored.timestamp, Some(now));
        assert!(store.contains_id(&stored.id));
        assert_eq!(store.list(), vec![stored]);
    }

    #[test]
    fn admit_keeps_caller_id() {
        let store = WasteLogStore::new();
        let stored = store.admit(entry("client-42"), Utc::now());
        assert_eq!(stored.id, "client-42");
    }

    #[test]
    fn admit_with_sees_the_stored_record() {
        let store = WasteLogStore::new();
        let (stored, seen) = store.admit_with(entry(""), Utc::now(), |e| e.id.clone());
        assert_eq!(stored.id, seen);
        assert!(!seen.is_empty());
    }

    #[test]
    fn generated_ids_are_distinct() {
        let store = WasteLogStore::new();
        let now = Utc::now();
        for _ in 0..200 {
            store.admit(entry(""), now);
        }
        let mut ids: Vec<_> = store.list().into_iter().map(|e| e.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 200);
    }
}
