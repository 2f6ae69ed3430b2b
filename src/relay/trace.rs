//! Per-request tracing span and CORS layer.
//!
//! The middleware logs once the response headers exist. Bodies are streamed
//! through untouched; buffering them here would hold back every chunk until
//! the upstream finished.

use std::time::Instant;

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub static X_TRACE_ID: HeaderName = HeaderName::from_static("x-trace-id");

pub async fn trace_middleware(mut req: Request, next: Next) -> Response {
    let start_time = Instant::now();

    let trace_id = req
        .headers()
        .get(&X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let trace_header = HeaderValue::from_str(&trace_id.to_string()).ok();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        info!("request started");
        if let Some(value) = &trace_header {
            req.headers_mut().insert(X_TRACE_ID.clone(), value.clone());
        }

        let mut response = next.run(req).await;

        if let Some(value) = trace_header {
            response.headers_mut().insert(X_TRACE_ID.clone(), value);
        }
        info!(
            status = response.status().as_u16(),
            latency_ms = start_time.elapsed().as_millis() as u64,
            "response headers ready"
        );
        response
    }
    .instrument(span)
    .await
}

/// Wildcard when `origins` is empty or unparseable, otherwise the listed
/// origins only.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods(Any)
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_headers(Any)
            .allow_methods(Any)
    }
}
