//! Proxy endpoints: manifests, segments and subtitles.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use media_relay_lib::proxy::{serve_subtitle, X_CACHE};
use futures_util::StreamExt;
use media_relay_lib::{upstream, ProxiedResponse, ProxyBody, RelayError};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use super::handlers::HttpError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: Option<String>,
    /// JSON object of headers to send upstream
    pub headers: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HlsQuery {
    pub link: Option<String>,
    pub headers: Option<String>,
}

/// Turn a library response into an axum one. Streamed bodies stay streamed.
pub fn into_axum(proxied: ProxiedResponse) -> Response {
    let body = match proxied.body {
        ProxyBody::Full(bytes) => Body::from(bytes),
        ProxyBody::Stream(stream) => Body::from_stream(stream),
    };
    let mut response = Response::new(body);
    *response.status_mut() = proxied.status;
    *response.headers_mut() = proxied.headers;
    response
}

/// Like [`into_axum`], counting body bytes as they are handed to the
/// client. Streamed bodies are counted chunk by chunk, so a client that
/// hangs up early only counts what it was sent.
fn counted(state: &Arc<AppState>, proxied: ProxiedResponse) -> Response {
    let body = match proxied.body {
        ProxyBody::Full(bytes) => {
            state.metrics.record_bytes(bytes.len() as u64);
            ProxyBody::Full(bytes)
        }
        ProxyBody::Stream(stream) => {
            let state = state.clone();
            ProxyBody::Stream(
                stream
                    .inspect(move |chunk| {
                        if let Ok(bytes) = chunk {
                            state.metrics.record_bytes(bytes.len() as u64);
                        }
                    })
                    .boxed(),
            )
        }
    };
    into_axum(ProxiedResponse {
        status: proxied.status,
        headers: proxied.headers,
        body,
    })
}

fn error_kind(err: &RelayError) -> &'static str {
    match err {
        RelayError::UpstreamRejected { .. } => "upstream_rejected",
        RelayError::UpstreamUnreachable(_) => "upstream_unreachable",
        RelayError::InvalidRequest(_) => "invalid_request",
        _ => "internal",
    }
}

fn fail(state: &AppState, route: &str, target: &str, err: RelayError) -> HttpError {
    state.metrics.record_error(error_kind(&err));
    warn!(route, url = target, "proxy request failed: {}", err);
    HttpError::Proxy(err)
}

/// Rewritten HLS manifest
/// GET /m3u8-proxy?url=..&headers=..
pub async fn m3u8_proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyQuery>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let Some(target) = query.url.filter(|u| !u.is_empty()) else {
        return Err(HttpError::missing_param("URL parameter required"));
    };
    manifest(&state, &target, query.headers.as_deref(), &headers).await
}

/// Alias of the manifest proxy taking `link=`
/// GET /proxy/hls?link=..&headers=..
pub async fn hls_proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HlsQuery>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let Some(target) = query.link.filter(|u| !u.is_empty()) else {
        return Err(HttpError::missing_param("Link parameter is required"));
    };
    manifest(&state, &target, query.headers.as_deref(), &headers).await
}

async fn manifest(
    state: &Arc<AppState>,
    target: &str,
    headers_param: Option<&str>,
    request_headers: &HeaderMap,
) -> Result<Response, HttpError> {
    let upstream_headers = upstream::parse_headers_param(headers_param);
    let server_url = state.server_url(request_headers);
    let proxied = state
        .rewriter
        .rewrite(target, &upstream_headers, &server_url)
        .await
        .map_err(|e| fail(state, "m3u8", target, e))?;
    Ok(counted(state, proxied))
}

/// Segment, key or direct video file
/// GET /ts-proxy?url=..&headers=..
pub async fn ts_proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyQuery>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    if state.config.disable_segment_proxy {
        return Ok((StatusCode::NOT_FOUND, "TS proxying is disabled").into_response());
    }
    let Some(target) = query.url.filter(|u| !u.is_empty()) else {
        return Err(HttpError::missing_param("URL parameter required"));
    };
    let upstream_headers = upstream::parse_headers_param(query.headers.as_deref());
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());

    let proxied = state
        .segments
        .serve(&target, &upstream_headers, range)
        .await
        .map_err(|e| fail(&state, "ts", &target, e))?;

    match proxied.headers.get(X_CACHE).map(|v| v.as_bytes()) {
        Some(b"HIT") => state.metrics.record_cache_hit(),
        _ => state.metrics.record_cache_miss(),
    }
    debug!(url = %target, status = proxied.status.as_u16(), "segment response");
    Ok(counted(&state, proxied))
}

/// Subtitle pass-through
/// GET /sub-proxy?url=..&headers=..
pub async fn sub_proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, HttpError> {
    let Some(target) = query.url.filter(|u| !u.is_empty()) else {
        return Err(HttpError::missing_param("url parameter required"));
    };
    let upstream_headers = upstream::parse_headers_param(query.headers.as_deref());
    let proxied = serve_subtitle(&state.client, &target, &upstream_headers)
        .await
        .map_err(|e| fail(&state, "sub", &target, e))?;
    Ok(counted(&state, proxied))
}

/// Liveness of the proxy half
/// GET /proxy/status
pub async fn proxy_status(headers: HeaderMap) -> Response {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    Json(json!({
        "status": "Proxy server is working",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "userAgent": user_agent,
    }))
    .into_response()
}
