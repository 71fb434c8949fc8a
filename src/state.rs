//! Application state management
//!
//! This module defines the AppState structure that holds:
//! - The aggregation orchestrator and its caches
//! - The manifest rewriter and segment proxy
//! - The shared outgoing HTTP client
//! - Metrics and server configuration

use axum::http::HeaderMap;
use media_relay_lib::{
    upstream, HttpJsonProvider, Orchestrator, OrchestratorConfig, PlaylistRewriter,
    ProviderHealthTracker, RegisteredProvider, ResponseCache, SegmentCache, SegmentProxy,
    SourceValidator,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::metrics::Metrics;

/// Shared state handed to every handler
pub struct AppState {
    pub config: ServerConfig,
    pub client: reqwest::Client,
    pub orchestrator: Orchestrator,
    pub rewriter: PlaylistRewriter,
    pub segments: SegmentProxy,
    pub response_cache: Arc<ResponseCache>,
    pub segment_cache: Arc<SegmentCache>,
    pub metrics: Metrics,
}

impl AppState {
    /// Build state with the providers declared in the configuration.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let client = upstream::build_client(config.connect_timeout())?;
        let providers = config
            .providers
            .iter()
            .map(|p| HttpJsonProvider::new(p.clone(), client.clone()).into_registered())
            .collect();
        Ok(Self::assemble(config, client, providers))
    }

    /// Build state around an explicit provider list.
    pub fn with_providers(config: ServerConfig, providers: Vec<RegisteredProvider>) -> Result<Self> {
        let client = upstream::build_client(config.connect_timeout())?;
        Ok(Self::assemble(config, client, providers))
    }

    fn assemble(
        config: ServerConfig,
        client: reqwest::Client,
        providers: Vec<RegisteredProvider>,
    ) -> Self {
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        info!(providers = ?names, "registered providers");

        let response_cache = Arc::new(ResponseCache::new(config.response_cache.clone()));
        let segment_cache = Arc::new(SegmentCache::new(config.segment_cache.clone()));
        let orchestrator = Orchestrator::new(
            providers,
            Arc::new(ProviderHealthTracker::new(config.health.clone())),
            response_cache.clone(),
            Arc::new(SourceValidator::new(client.clone(), config.validation.clone())),
            OrchestratorConfig {
                diagnostics: config.diagnostics,
            },
        );

        Self {
            rewriter: PlaylistRewriter::new(client.clone()).with_timeout(config.manifest_timeout()),
            segments: SegmentProxy::new(client.clone(), segment_cache.clone())
                .with_idle_timeout(config.segment_idle_timeout()),
            orchestrator,
            response_cache,
            segment_cache,
            metrics: Metrics::new(),
            client,
            config,
        }
    }

    /// Base URL for links pointing back at this server: the configured
    /// public URL, else `X-Forwarded-Proto` (or http) plus `Host`.
    pub fn server_url(&self, headers: &HeaderMap) -> String {
        if let Some(url) = &self.config.public_url {
            return url.clone();
        }
        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("http");
        let host = headers
            .get(axum::http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| format!("localhost:{}", self.config.port));
        format!("{}://{}", proto, host)
    }

    /// Start the periodic cache sweeps.
    pub fn spawn_sweepers(self: &Arc<Self>) {
        let state = self.clone();
        let every = Duration::from_secs(self.config.response_sweep_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = state.response_cache.evict_expired();
                debug!(removed, remaining = state.response_cache.len(), "response cache sweep");
            }
        });

        let state = self.clone();
        let every = Duration::from_secs(self.config.segment_sweep_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = state.segment_cache.evict_expired();
                debug!(
                    removed,
                    remaining = state.segment_cache.len(),
                    memory_bytes = state.segment_cache.memory_usage(),
                    "segment cache sweep"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn state(config: ServerConfig) -> AppState {
        AppState::new(config).unwrap()
    }

    #[test]
    fn test_server_url_from_host() {
        let state = state(ServerConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("relay.test:3000"));
        assert_eq!(state.server_url(&headers), "http://relay.test:3000");

        headers.insert("x-forwarded-proto", HeaderValue::from_static("https, http"));
        assert_eq!(state.server_url(&headers), "https://relay.test:3000");
    }

    #[test]
    fn test_public_url_wins() {
        let state = state(ServerConfig {
            public_url: Some("https://relay.example".to_string()),
            ..Default::default()
        });
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("internal:3000"));
        assert_eq!(state.server_url(&headers), "https://relay.example");
    }

    #[test]
    fn test_configured_providers_are_registered() {
        let mut config = ServerConfig::default();
        config.providers.push(media_relay_lib::ProviderConfig {
            name: "alpha".to_string(),
            kind: Default::default(),
            movie_url: Some("https://alpha.example/{tmdb}".to_string()),
            tv_url: None,
            timeout_ms: None,
            headers: Default::default(),
        });
        let state = state(config);
        assert_eq!(state.orchestrator.providers().len(), 1);
        assert_eq!(state.orchestrator.providers()[0].name(), "alpha");
    }
}
