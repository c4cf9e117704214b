//! # Data Retrieval Module
//!
//! HTTP clients for the collaborators the pipeline talks to but does not own:
//! the AI inference service, a remote GIS broadcast service, and the
//! blockchain anchoring service.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A generic `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with exponential-backoff retries on transient
//!   failures and a per-request timeout.
//! - **`services`**: `DownstreamServices`, one typed call per collaborator
//!   endpoint, each returning `Result<_, GreenError>` so callers can apply
//!   their own failure policy.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware.
pub mod ky_http;
/// Typed calls to the AI, GIS and blockchain services.
pub mod services;

pub use ky_http::{ApiClient, ApiResponse, ClientOptions};
pub use services::{AnchorReceipt, AnchorRequest, DownstreamConfig, DownstreamServices};
