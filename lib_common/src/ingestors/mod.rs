//! # Live Feed Consumers
//!
//! Client side of the pipeline: everything a dashboard or terminal needs to
//! follow the waste log as it grows.
//!
//! ## Contained Modules:
//! - **`backoff`**: capped multiplicative reconnect delays.
//! - **`waste_wss`**: the reconnecting WebSocket channel and the `waste`
//!   event hook built on it.
//! - **`live_view`**: the id-deduplicating merge reducer and the feed state
//!   shown by status indicators.
//! - **`feed_polling`**: a live feed that falls back to HTTP polling when the
//!   real-time channel stays silent.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Reconnect delay policy.
pub mod backoff;
/// Live feed with HTTP polling fallback.
pub mod feed_polling;
/// Merge reducer and feed state.
pub mod live_view;
/// Reconnecting WebSocket channel and waste hook.
pub mod waste_wss;

pub use backoff::{Backoff, BackoffPolicy};
pub use feed_polling::{PollingConfig, PollingFeed};
pub use live_view::{FeedState, LiveLogView};
pub use waste_wss::{ConnectionStatus, ResilientChannel, WasteLiveHook};
