//! Axum router for the relay.
//!
//! [`build`] assembles:
//! - `POST /api/patient/query`, the streaming pass-through to the LLM service
//! - `GET /health`
//! - CORS and per-request tracing layers

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tower::ServiceBuilder;
use tracing::{debug, info, warn};

use crate::api::{GenerateAnswerRequest, HealthResponse, QueryRequest};
use crate::relay::error::RelayError;
use crate::relay::state::RelayState;
use crate::relay::trace::{cors_layer, trace_middleware};

pub const QUERY_ROUTE: &str = "/api/patient/query";
pub const HEALTH_ROUTE: &str = "/health";
pub const MAX_TEXT_BYTES: usize = 64 * 1024;

const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

pub fn build(state: Arc<RelayState>) -> Router {
    Router::new()
        .route(QUERY_ROUTE, post(patient_query))
        .route(HEALTH_ROUTE, get(health))
        .layer(ServiceBuilder::new().layer(cors_layer(&state.cors_origins)))
        .layer(middleware::from_fn(trace_middleware))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

fn validate(query: &QueryRequest) -> Result<(), RelayError> {
    if query.session_id.trim().is_empty() {
        return Err(RelayError::Validation("sessionId is required".into()));
    }
    if query.text.trim().is_empty() {
        return Err(RelayError::Validation("text is required".into()));
    }
    if query.text.len() > MAX_TEXT_BYTES {
        return Err(RelayError::Validation(format!(
            "text exceeds {MAX_TEXT_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Forward the query and stream the upstream reply back as it arrives, with
/// the upstream's status and content type.
async fn patient_query(
    State(state): State<Arc<RelayState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Response, RelayError> {
    let Json(query) = payload?;
    validate(&query)?;
    info!(session_id = %query.session_id, text_bytes = query.text.len(), "forwarding query");

    let forward = GenerateAnswerRequest::from(query);
    let send = state.client.post(&state.generate_url).json(&forward).send();
    let upstream = match tokio::time::timeout(state.idle_timeout, send).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) if err.is_timeout() => {
            return Err(RelayError::UpstreamTimeout(state.idle_timeout))
        }
        Ok(Err(err)) => return Err(RelayError::UpstreamUnavailable(err.to_string())),
        Err(_) => return Err(RelayError::UpstreamTimeout(state.idle_timeout)),
    };

    let status = upstream.status();
    if !status.is_success() {
        warn!(status = status.as_u16(), "upstream returned an error status");
    }
    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    let body = Body::from_stream(idle_bounded(upstream.bytes_stream(), state.idle_timeout));
    Ok((
        status,
        [
            (CONTENT_TYPE, content_type),
            (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        body,
    )
        .into_response())
}

/// Pass chunks through unchanged, ending with an error when the upstream
/// drops or stalls for longer than `idle`. An error, unlike a clean end,
/// aborts the downstream response so the client sees the failure.
///
/// Dropping the returned stream (client disconnect) drops the upstream body
/// and with it the upstream connection.
fn idle_bounded<S>(
    upstream: S,
    idle: std::time::Duration,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    futures_util::stream::unfold(Some(Box::pin(upstream)), move |upstream| async move {
        let mut upstream = upstream?;
        match tokio::time::timeout(idle, upstream.next()).await {
            Ok(Some(Ok(bytes))) => Some((Ok(bytes), Some(upstream))),
            Ok(Some(Err(err))) => {
                warn!(error = %err, "upstream stream failed");
                Some((Err(io::Error::other(err)), None))
            }
            Ok(None) => {
                debug!("upstream stream finished");
                None
            }
            Err(_) => {
                warn!(?idle, "upstream stream stalled");
                Some((
                    Err(io::Error::new(io::ErrorKind::TimedOut, "upstream idle timeout")),
                    None,
                ))
            }
        }
    })
}
