//! HTTP middleware

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::state::AppState;

/// Request logging middleware. Also counts the request per route.
pub async fn request_logger(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().path().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    state.metrics.record_request(&endpoint);

    if response.status().is_success() || response.status().is_redirection() {
        info!(%method, path = %uri, status, elapsed_ms, "request");
    } else {
        warn!(%method, path = %uri, status, elapsed_ms, "request");
    }

    response
}
