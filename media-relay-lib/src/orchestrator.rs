//! Aggregation orchestrator.
//!
//! Fans a [`MediaRequest`] out to every registered provider at once, each
//! under its own timeout, then merges what came back. One slow or broken
//! provider never holds up or cancels the others.

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::health::{ProviderHealthTracker, ProviderStats};
use crate::provider::{ProviderKind, RegisteredProvider};
use crate::types::{AggregationResult, FileSource, MediaRequest, ProviderResult, SubtitleTrack};
use crate::validate::SourceValidator;

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Skip the response cache and attach provider errors to every result
    pub diagnostics: bool,
}

/// What happened to one provider during an aggregation.
#[derive(Debug)]
enum Outcome {
    Success(ProviderResult),
    Failure(ProviderError),
    Skipped(ProviderError),
    /// The provider cannot answer this request; it was never consulted
    Unsupported,
}

/// Health row plus derived values, as served by `/provider-stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderReport {
    #[serde(flatten)]
    pub stats: ProviderStats,
    pub kind: ProviderKind,
    pub success_rate: f64,
    pub is_healthy: bool,
    pub recommended_timeout_ms: u64,
}

pub struct Orchestrator {
    providers: Vec<RegisteredProvider>,
    health: Arc<ProviderHealthTracker>,
    cache: Arc<ResponseCache>,
    validator: Arc<SourceValidator>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        providers: Vec<RegisteredProvider>,
        health: Arc<ProviderHealthTracker>,
        cache: Arc<ResponseCache>,
        validator: Arc<SourceValidator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            providers,
            health,
            cache,
            validator,
            config,
        }
    }

    pub fn providers(&self) -> &[RegisteredProvider] {
        &self.providers
    }

    pub fn health(&self) -> &ProviderHealthTracker {
        &self.health
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Find playable files for `request`.
    ///
    /// Never fails. When every provider comes back empty the result has no
    /// files, and it is not cached so the next call scrapes again.
    pub async fn aggregate(&self, request: &MediaRequest) -> AggregationResult {
        let key = request.cache_key();
        if !self.config.diagnostics {
            if let Some(hit) = self.cache.get(&key) {
                debug!(key = %key, files = hit.files.len(), "serving aggregation from cache");
                return hit;
            }
        }

        let started = Instant::now();
        let outcomes = join_all(self.providers.iter().map(|p| self.run_provider(p, request))).await;

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Success(result) => results.push(result),
                Outcome::Failure(err) | Outcome::Skipped(err) => errors.push(err),
                Outcome::Unsupported => {}
            }
        }

        let files = self.merge_files(&results);
        let subtitles = merge_subtitles(&results);
        let files = self.validator.validate_all(files).await;

        info!(
            key = %key,
            files = files.len(),
            subtitles = subtitles.len(),
            failed = errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "aggregation finished"
        );

        let result = AggregationResult {
            files,
            subtitles,
            diagnostics: self.config.diagnostics.then_some(errors),
        };
        if !result.is_empty() && !self.config.diagnostics {
            self.cache.put(&key, result.clone());
        }
        result
    }

    async fn run_provider(&self, registered: &RegisteredProvider, request: &MediaRequest) -> Outcome {
        let name = registered.name();
        if !registered.provider.supports(request) {
            debug!(provider = name, key = %request.cache_key(), "provider does not support request");
            return Outcome::Unsupported;
        }
        if !self.health.is_healthy(name) {
            debug!(provider = name, "skipping unhealthy provider");
            return Outcome::Skipped(ProviderError::new(
                name,
                ProviderErrorKind::Skipped,
                "provider marked unhealthy",
            ));
        }

        let timeout = self.timeout_for(registered);
        let started = Instant::now();
        // Dropping the future on timeout drops its in-flight request too.
        let call = AssertUnwindSafe(registered.provider.fetch_sources(request)).catch_unwind();
        let outcome = match tokio::time::timeout(timeout, call).await {
            Err(_) => Err(ProviderError::new(
                name,
                ProviderErrorKind::Timeout,
                format!("timed out after {}ms", timeout.as_millis()),
            )),
            Ok(Err(_)) => Err(ProviderError::new(
                name,
                ProviderErrorKind::Panicked,
                "provider panicked",
            )),
            Ok(Ok(result)) => result,
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(mut result) => {
                result.provider_name = name.to_string();
                for file in &mut result.files {
                    file.provider_name = name.to_string();
                }
                self.health.record_success(name, elapsed, result.files.len());
                debug!(
                    provider = name,
                    files = result.files.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "provider succeeded"
                );
                Outcome::Success(result)
            }
            Err(err) => {
                self.health.record_failure(name, &err.message);
                warn!(
                    provider = name,
                    kind = %err.kind,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "provider failed: {}",
                    err.message
                );
                Outcome::Failure(err)
            }
        }
    }

    /// Content providers with enough history get the recommended timeout;
    /// everything else uses its static default.
    fn timeout_for(&self, registered: &RegisteredProvider) -> Duration {
        let name = registered.name();
        if registered.kind == ProviderKind::Content && self.health.has_reliable_stats(name) {
            self.health.recommended_timeout(name)
        } else {
            registered.default_timeout
        }
    }

    /// Flatten in provider order, drop malformed URLs, keep the first copy
    /// of each `(url, tag)`.
    fn merge_files(&self, results: &[ProviderResult]) -> Vec<FileSource> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for file in results.iter().flat_map(|r| r.files.iter()) {
            if let Err(e) = self.validator.check_structure(&file.url) {
                debug!(provider = %file.provider_name, "dropping candidate: {}", e);
                continue;
            }
            let (url, tag) = file.dedup_key();
            if seen.insert((url.to_string(), tag.map(str::to_string))) {
                files.push(file.clone());
            }
        }
        files
    }

    /// Per registered provider, in registration order.
    pub fn provider_stats(&self) -> Vec<ProviderReport> {
        self.providers
            .iter()
            .map(|p| {
                let name = p.name();
                ProviderReport {
                    stats: self.health.get(name).unwrap_or_else(|| ProviderStats::new(name)),
                    kind: p.kind,
                    success_rate: self.health.success_rate(name),
                    is_healthy: self.health.is_healthy(name),
                    recommended_timeout_ms: self.timeout_for(p).as_millis() as u64,
                }
            })
            .collect()
    }
}

/// Subtitles are equal when their URLs are, whoever found them.
fn merge_subtitles(results: &[ProviderResult]) -> Vec<SubtitleTrack> {
    let mut seen = HashSet::new();
    results
        .iter()
        .flat_map(|r| r.subtitles.iter())
        .filter(|s| seen.insert(s.url.clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCacheConfig;
    use crate::health::HealthConfig;
    use crate::provider::mock::{Behavior, MockProvider};
    use crate::validate::ValidationConfig;

    fn orchestrator(providers: Vec<RegisteredProvider>, diagnostics: bool) -> Orchestrator {
        Orchestrator::new(
            providers,
            Arc::new(ProviderHealthTracker::new(HealthConfig::default())),
            Arc::new(ResponseCache::new(ResponseCacheConfig::default())),
            Arc::new(SourceValidator::new(reqwest::Client::new(), ValidationConfig::default())),
            OrchestratorConfig { diagnostics },
        )
    }

    fn files(urls: &[&str]) -> Behavior {
        Behavior::Files(urls.iter().map(|u| u.to_string()).collect())
    }

    #[tokio::test]
    async fn test_total_failure_is_empty_and_uncached() {
        let failing = Arc::new(MockProvider::new("a", Behavior::Fail));
        let orch = orchestrator(vec![RegisteredProvider::content(failing.clone())], false);

        let result = orch.aggregate(&MediaRequest::movie(1)).await;
        assert!(result.is_empty());
        assert!(result.diagnostics.is_none());
        assert!(orch.cache().is_empty());

        orch.aggregate(&MediaRequest::movie(1)).await;
        assert_eq!(failing.calls(), 2);
    }

    #[tokio::test]
    async fn test_subtitles_dedup_by_url_across_providers() {
        let a = MockProvider::new("a", files(&["https://cdn.example/a.m3u8"]))
            .with_subtitles(&["https://subs.example/en.vtt"]);
        let b = MockProvider::new("b", files(&[])).with_subtitles(&[
            "https://subs.example/en.vtt",
            "https://subs.example/fr.vtt",
        ]);
        let orch = orchestrator(
            vec![
                RegisteredProvider::content(Arc::new(a)),
                RegisteredProvider::subtitles(Arc::new(b)),
            ],
            false,
        );
        let result = orch.aggregate(&MediaRequest::movie(2)).await;
        assert_eq!(result.subtitles.len(), 2);
        assert_eq!(result.subtitles[0].url, "https://subs.example/en.vtt");
    }

    #[tokio::test]
    async fn test_structural_check_drops_bad_candidates() {
        let p = MockProvider::new(
            "a",
            files(&[
                "http://cdn.example/plain.m3u8",
                "https://cdn.example/x.m3u8?v={v1}",
                "https://cdn.example/ok.m3u8",
            ]),
        );
        let orch = orchestrator(vec![RegisteredProvider::content(Arc::new(p))], false);
        let result = orch.aggregate(&MediaRequest::movie(3)).await;
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].url, "https://cdn.example/ok.m3u8");
    }

    #[tokio::test]
    async fn test_same_url_from_same_provider_with_distinct_tags_survives() {
        #[derive(Debug)]
        struct Tagged;

        #[async_trait::async_trait]
        impl crate::provider::Provider for Tagged {
            fn name(&self) -> &str {
                "tagged"
            }
            async fn fetch_sources(&self, _: &MediaRequest) -> Result<ProviderResult, ProviderError> {
                let mut r = ProviderResult::new("tagged");
                let url = "https://cdn.example/same.m3u8";
                r.files.push(FileSource::new("tagged", url).with_tag("s1"));
                r.files.push(FileSource::new("tagged", url).with_tag("s2"));
                r.files.push(FileSource::new("tagged", url).with_tag("s1"));
                Ok(r)
            }
        }

        let orch = orchestrator(vec![RegisteredProvider::content(Arc::new(Tagged))], false);
        let result = orch.aggregate(&MediaRequest::movie(4)).await;
        assert_eq!(result.files.len(), 2);
    }

    #[tokio::test]
    async fn test_panicking_provider_is_recorded_and_others_survive() {
        let ok = Arc::new(MockProvider::new("ok", files(&["https://cdn.example/a.m3u8"])));
        let boom = Arc::new(MockProvider::new("boom", Behavior::Panic));
        let orch = orchestrator(
            vec![RegisteredProvider::content(boom), RegisteredProvider::content(ok)],
            true,
        );
        let result = orch.aggregate(&MediaRequest::movie(5)).await;
        assert_eq!(result.files.len(), 1);
        let diagnostics = result.diagnostics.unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, ProviderErrorKind::Panicked);
        assert_eq!(orch.health().get("boom").unwrap().failure_count, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_provider_is_skipped_without_a_call() {
        let p = Arc::new(MockProvider::new("flaky", files(&["https://cdn.example/a.m3u8"])));
        let orch = orchestrator(vec![RegisteredProvider::content(p.clone())], true);
        for _ in 0..5 {
            orch.health().record_failure("flaky", "earlier failure");
        }

        let result = orch.aggregate(&MediaRequest::movie(6)).await;
        assert_eq!(p.calls(), 0);
        assert!(result.is_empty());
        let diagnostics = result.diagnostics.unwrap();
        assert_eq!(diagnostics[0].kind, ProviderErrorKind::Skipped);
        // a skip is not an observation
        assert_eq!(orch.health().get("flaky").unwrap().total_requests, 5);
    }

    #[tokio::test]
    async fn test_diagnostics_mode_bypasses_cache() {
        let p = Arc::new(MockProvider::new("a", files(&["https://cdn.example/a.m3u8"])));
        let orch = orchestrator(vec![RegisteredProvider::content(p.clone())], true);
        orch.aggregate(&MediaRequest::movie(7)).await;
        orch.aggregate(&MediaRequest::movie(7)).await;
        assert_eq!(p.calls(), 2);
        assert!(orch.cache().is_empty());
    }

    #[tokio::test]
    async fn test_provider_stats_lists_registered_providers() {
        let a = Arc::new(MockProvider::new("a", files(&["https://cdn.example/a.m3u8"])));
        let s = Arc::new(MockProvider::new("subs", files(&[])));
        let orch = orchestrator(
            vec![RegisteredProvider::content(a), RegisteredProvider::subtitles(s)],
            false,
        );
        orch.aggregate(&MediaRequest::movie(8)).await;
        let report = orch.provider_stats();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].stats.success_count, 1);
        assert_eq!(report[1].recommended_timeout_ms, 10_000);
        let json = serde_json::to_value(&report[0]).unwrap();
        assert_eq!(json["providerName"], "a");
        assert_eq!(json["successRate"], 100.0);
    }
}
