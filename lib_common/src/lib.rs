//! # green_common
//!
//! Shared library for the Green Track live waste-log pipeline. Each folder is
//! a feature; `full` (the default) turns everything on.
//!
//! - `utils`: identifiers, report digests, clock helpers.
//! - `core`: the waste log model, store, broadcast dispatcher and errors.
//! - `retrieve`: HTTP client with retries and the downstream collaborators.
//! - `ingestors`: live feed consumers (reconnecting hook, polling fallback).
//! - `server`: the axum service that ties it all together.
//! - `loggers`: fern setup for the binaries.

#[cfg(feature = "core")]
pub mod core;
#[cfg(feature = "ingestors")]
pub mod ingestors;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "retrieve")]
pub mod retrieve;
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "utils")]
pub mod utils;
