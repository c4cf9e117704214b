//! # Error Taxonomy
//!
//! One error type for the whole pipeline. The variants follow how a failure
//! is treated rather than where it came from:
//!
//! - **`MalformedInput`**: the caller sent something unusable. Reported as 400
//!   and never touches the store.
//! - **`NotConfigured`**: an optional collaborator (AI, GIS, blockchain) has
//!   no base URL. Reported as 503 where the collaborator is the whole point
//!   of the request, skipped silently where it is a side effect.
//! - **`Downstream`**: a collaborator was reachable in principle but failed.
//!   Swallowed by ingestion, reported as 502 by the pure proxies.
//! - **`Transport`**: a subscriber channel failed. Isolated to that channel.

use thiserror::Error;

/// Errors produced by the waste log pipeline.
#[derive(Debug, Error)]
pub enum GreenError {
    /// The request body could not be used.
    #[error("{0}")]
    MalformedInput(String),

    /// The named downstream service has no base URL configured.
    #[error("{0} service is not configured")]
    NotConfigured(&'static str),

    /// A downstream service call failed.
    #[error("{service} service failed: {message}")]
    Downstream {
        /// Short service name (`ai`, `gis`, `blockchain`).
        service: &'static str,
        /// What went wrong.
        message: String,
    },

    /// A subscriber channel could not be written to or read from.
    #[error("transport error: {0}")]
    Transport(String),
}

impl GreenError {
    /// Builds a `Downstream` error from anything displayable.
    pub fn downstream(service: &'static str, err: impl std::fmt::Display) -> Self {
        GreenError::Downstream {
            service,
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "server")]
mod http {
    use super::GreenError;
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };
    use serde_json::json;

    impl GreenError {
        /// HTTP status this error maps to.
        pub fn status_code(&self) -> StatusCode {
            match self {
                GreenError::MalformedInput(_) => StatusCode::BAD_REQUEST,
                GreenError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
                GreenError::Downstream { .. } => StatusCode::BAD_GATEWAY,
                GreenError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    impl IntoResponse for GreenError {
        fn into_response(self) -> Response {
            let status = self.status_code();
            let body = Json(json!({
                "status": "error",
                "error": self.to_string(),
            }));
            (status, body).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_caller_facing() {
        assert_eq!(
            GreenError::MalformedInput("Hash and description are required".into()).to_string(),
            "Hash and description are required"
        );
        assert_eq!(
            GreenError::NotConfigured("blockchain").to_string(),
            "blockchain service is not configured"
        );
        assert_eq!(
            GreenError::downstream("ai", "connection refused").to_string(),
            "ai service failed: connection refused"
        );
    }
}
