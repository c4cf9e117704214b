//! Waste log identifiers.
//!
//! The wire format is `<epoch-ms>-<n>` where `n` is drawn uniformly from
//! `0..100000`. Two ids minted in the same millisecond collide with
//! probability 1/100000, so callers that need uniqueness must check against
//! what they already hold (the store does, see `WasteLogStore::contains_id`).

use chrono::Utc;
use rand::Rng;

/// Upper bound (exclusive) of the random suffix.
const SUFFIX_RANGE: u32 = 100_000;

/// Mints a new identifier from the current time and a random suffix.
pub fn generate_log_id() -> String {
    let suffix = rand::rng().random_range(0..SUFFIX_RANGE);
    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_has_timestamp_and_suffix() {
        let before = Utc::now().timestamp_millis();
        let id = generate_log_id();
        let after = Utc::now().timestamp_millis();

        let (ts, suffix) = id.split_once('-').expect("id must contain a dash");
        let ts: i64 = ts.parse().expect("timestamp part must be numeric");
        let suffix: u32 = suffix.parse().expect("suffix must be numeric");

        assert!(ts >= before && ts <= after);
        assert!(suffix < SUFFIX_RANGE);
    }
}
