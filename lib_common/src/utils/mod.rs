//! # Utilities Module
//!
//! A collection point for small, general-purpose helpers used across the
//! `green_common` crate: identifier generation for waste log entries, SHA-256
//! digests for anchoring reports, and wall-clock helpers.
//!
//! ## Contained Modules:
//!
//! - **`ids`**: Coarse timestamp + random suffix identifiers.
//! - **`digest`**: Hex-encoded SHA-256 of arbitrary bytes or JSON values.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Identifier generation for waste log entries.
pub mod ids;
/// SHA-256 helpers for report anchoring.
pub mod digest;

pub use digest::{sha256_hex, sha256_json};
pub use ids::generate_log_id;

/// Milliseconds since the Unix epoch, as used in `welcome` frames.
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
