//! HTTP request handlers
//!
//! Source lookup, provider statistics, cache statistics, metrics and health.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use media_relay_lib::proxy::url::wrap_result;
use media_relay_lib::{MediaRequest, ProxiedResponse, RelayError};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::state::AppState;

const DOCS_HINT: &str = "Check the documentation again to see how to use this endpoint";

/// HTTP error type
#[derive(Debug)]
pub enum HttpError {
    /// JSON `{error, hint}` answer for the aggregation API
    Api {
        status: StatusCode,
        error: String,
        hint: Option<String>,
    },
    /// Proxy failure: the upstream status (or 500) with a short text body
    Proxy(RelayError),
}

impl HttpError {
    pub fn api(status: StatusCode, error: impl Into<String>, hint: Option<&str>) -> Self {
        HttpError::Api {
            status,
            error: error.into(),
            hint: hint.map(str::to_string),
        }
    }

    /// 400 with `{error}` for a missing proxy parameter.
    pub fn missing_param(message: &str) -> Self {
        Self::api(StatusCode::BAD_REQUEST, message, None)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        match self {
            HttpError::Api { status, error, hint } => {
                let body = match hint {
                    Some(hint) => json!({ "error": error, "hint": hint }),
                    None => json!({ "error": error }),
                };
                (status, Json(body)).into_response()
            }
            HttpError::Proxy(err) => {
                let status = StatusCode::from_u16(err.proxy_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                super::proxy::into_axum(ProxiedResponse::text(status, format!("Proxy error: {}", err)))
            }
        }
    }
}

impl From<RelayError> for HttpError {
    fn from(err: RelayError) -> Self {
        HttpError::Proxy(err)
    }
}

/// Optional metadata a caller may pass along with a lookup
#[derive(Debug, Default, Deserialize)]
pub struct LookupQuery {
    pub imdb: Option<String>,
    pub title: Option<String>,
    pub year: Option<u16>,
    /// Season, tv only
    pub s: Option<String>,
    /// Episode, tv only
    pub e: Option<String>,
}

impl LookupQuery {
    fn apply(&self, request: &mut MediaRequest) {
        request.imdb_id = self.imdb.clone().filter(|s| !s.is_empty());
        request.title = self.title.clone();
        request.release_year = self.year;
    }
}

/// Index endpoint
/// GET /
pub async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "home": "media-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "routes": {
            "movie": "/movie/:tmdbId",
            "tv": "/tv/:tmdbId?s=seasonNumber&e=episodeNumber",
            "manifestProxy": "/m3u8-proxy?url=<url>&headers=<json>",
            "segmentProxy": "/ts-proxy?url=<url>&headers=<json>",
            "subtitleProxy": "/sub-proxy?url=<url>&headers=<json>",
            "providerStats": "/provider-stats",
        },
        "information": "This service does not host any media. It only links to content that is already available elsewhere."
    }))
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Movie lookup
/// GET /movie/{tmdb_id}
pub async fn movie_sources(
    State(state): State<Arc<AppState>>,
    Path(tmdb_id): Path<String>,
    Query(query): Query<LookupQuery>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let Some(tmdb_id) = parse_number::<u64>(&tmdb_id) else {
        return Err(HttpError::api(
            StatusCode::METHOD_NOT_ALLOWED,
            "Invalid movie id (contained more than only numbers)",
            Some(DOCS_HINT),
        ));
    };
    let mut request = MediaRequest::movie(tmdb_id);
    query.apply(&mut request);
    lookup(&state, request, &headers).await
}

/// Episode lookup
/// GET /tv/{tmdb_id}?s={season}&e={episode}
pub async fn tv_sources(
    State(state): State<Arc<AppState>>,
    Path(tmdb_id): Path<String>,
    Query(query): Query<LookupQuery>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let tmdb_id = parse_number::<u64>(&tmdb_id);
    let season = query.s.as_deref().and_then(parse_number::<u32>);
    let episode = query.e.as_deref().and_then(parse_number::<u32>);
    let (Some(tmdb_id), Some(season), Some(episode)) = (tmdb_id, season, episode) else {
        return Err(HttpError::api(
            StatusCode::METHOD_NOT_ALLOWED,
            "Invalid tv id, season, or episode number (must be numbers)",
            Some(DOCS_HINT),
        ));
    };
    let mut request = MediaRequest::episode(tmdb_id, season, episode);
    query.apply(&mut request);
    lookup(&state, request, &headers).await
}

/// GET /movie/
pub async fn movie_id_required() -> HttpError {
    HttpError::api(StatusCode::METHOD_NOT_ALLOWED, "Movie id is required", Some(DOCS_HINT))
}

/// GET /tv/
pub async fn tv_id_required() -> HttpError {
    HttpError::api(StatusCode::METHOD_NOT_ALLOWED, "TV id is required", Some(DOCS_HINT))
}

async fn lookup(state: &AppState, request: MediaRequest, headers: &HeaderMap) -> Result<Response, HttpError> {
    let result = state.orchestrator.aggregate(&request).await;
    state.metrics.record_aggregation(!result.is_empty());

    if result.is_empty() {
        // In diagnostics mode the provider errors are the interesting part.
        if let Some(errors) = result.diagnostics {
            return Ok((
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": RelayError::NoSourcesFound.to_string(),
                    "diagnostics": errors,
                })),
            )
                .into_response());
        }
        return Err(HttpError::api(
            StatusCode::NOT_FOUND,
            "Did not find any sources for this one :(",
            Some("The configured providers returned nothing playable for this title."),
        ));
    }

    let result = if state.config.wrap_sources {
        let server_url = state.server_url(headers);
        debug!(server_url = %server_url, files = result.files.len(), "wrapping sources");
        wrap_result(result, &server_url)
    } else {
        result
    };
    Ok(Json(result).into_response())
}

/// Accepts what a JavaScript `parseInt` would: leading digits, anything after
/// them ignored.
fn parse_number<T: std::str::FromStr>(raw: &str) -> Option<T> {
    let raw = raw.trim();
    let end = raw
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    raw[..end].parse().ok()
}

/// Provider health and timeouts
/// GET /provider-stats
pub async fn provider_stats(State(state): State<Arc<AppState>>) -> Response {
    let providers = state.orchestrator.provider_stats();
    Json(json!({
        "providers": providers,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

/// Cache statistics
/// GET /debug/cache
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "response": state.response_cache.stats(),
        "segment": state.segment_cache.stats(),
    }))
    .into_response()
}

/// Prometheus metrics
/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export_prometheus(),
    )
        .into_response()
}

/// Unknown path
pub async fn not_found() -> HttpError {
    HttpError::api(StatusCode::NOT_FOUND, "Not found", Some("Go to /"))
}
