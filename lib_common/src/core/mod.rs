//! # Core Pipeline Module
//!
//! The server-side heart of live waste-log propagation. A submitted entry is
//! appended to the `store`, then handed to the `dispatcher`, which pushes it
//! to every open subscriber channel.
//!
//! ## Core Components:
//!
//! - **`waste_log`**: The `WasteLogEntry` model and its enums, with input
//!   validation.
//! - **`store`**: The append-only, process-lifetime `WasteLogStore`.
//! - **`dispatcher`**: The `Dispatcher` broadcast gateway and the
//!   `ServerMessage` frames it carries.
//! - **`error`**: `GreenError`, shared by every layer of the crate.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// The broadcast gateway and server frames.
pub mod dispatcher;
/// Error taxonomy.
pub mod error;
/// Append-only in-memory log.
pub mod store;
/// Domain model.
pub mod waste_log;

// --- Public API Re-exports ---
pub use dispatcher::{Dispatcher, ServerMessage};
pub use error::GreenError;
pub use store::WasteLogStore;
pub use waste_log::{DisposalMethod, MaterialType, WasteCause, WasteLogEntry};
