//! Errors raised by the relay itself.
//!
//! Upstream non-success statuses are not represented here: the relay mirrors
//! those to its caller unchanged. `RelayError` covers requests that never
//! reach the LLM service, or that never get an answer from it.

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed body or missing fields; never forwarded upstream.
    #[error("{0}")]
    Validation(String),

    /// The upstream could not be reached at all.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The upstream accepted the connection but sent no headers in time.
    #[error("upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),
}

impl From<JsonRejection> for RelayError {
    fn from(rejection: JsonRejection) -> Self {
        RelayError::Validation(rejection.body_text())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::Validation(message) => {
                info!(%message, "rejected query");
                StatusCode::BAD_REQUEST
            }
            RelayError::UpstreamUnavailable(message) => {
                warn!(%message, "upstream unavailable");
                StatusCode::BAD_GATEWAY
            }
            RelayError::UpstreamTimeout(after) => {
                warn!(?after, "upstream timed out");
                StatusCode::GATEWAY_TIMEOUT
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
