//! Per-provider reliability statistics and the circuit breaker built on them.
//!
//! A provider moves from healthy to disabled after a run of consecutive
//! failures, and only a recorded success (or an explicit reset) brings it
//! back. Time alone never re-enables a provider. Stats live for the lifetime
//! of the process.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::provider::DEFAULT_CONTENT_TIMEOUT;

/// Tunables for the health tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Consecutive failures after which a provider is disabled
    pub disable_after_failures: u32,

    /// Observations needed before the success rate and average latency count
    pub min_observations: u64,

    /// Minimum success rate (0.0 - 1.0) for a provider with enough history
    pub min_success_rate: f64,

    /// Timeout handed out while there is not enough history
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,

    /// Lower clamp for recommended timeouts
    #[serde(with = "duration_ms")]
    pub min_timeout: Duration,

    /// Upper clamp for recommended timeouts
    #[serde(with = "duration_ms")]
    pub max_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            disable_after_failures: 5,
            min_observations: 5,
            min_success_rate: 0.20,
            default_timeout: DEFAULT_CONTENT_TIMEOUT,
            min_timeout: Duration::from_secs(5),
            max_timeout: Duration::from_secs(30),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Reliability record for one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub provider_name: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
    pub consecutive_failures: u32,
    pub disabled: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Last failure message, for `/provider-stats`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ProviderStats {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            provider_name: name.to_string(),
            ..Default::default()
        }
    }

    /// Success rate as a percentage, 100 when nothing is known yet.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 100.0;
        }
        (self.success_count as f64 / self.total_requests as f64 * 100.0).round()
    }
}

/// Process-wide health tracker.
///
/// Each row is mutated under its own DashMap shard lock and the lock is
/// never held across an await point.
#[derive(Debug, Default)]
pub struct ProviderHealthTracker {
    stats: DashMap<String, ProviderStats>,
    config: HealthConfig,
}

impl ProviderHealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            stats: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Record a successful call. Clears the disabled flag.
    pub fn record_success(&self, name: &str, elapsed: Duration, file_count: usize) {
        let mut entry = self
            .stats
            .entry(name.to_string())
            .or_insert_with(|| ProviderStats::new(name));
        let stats = entry.value_mut();

        stats.success_count += 1;
        stats.total_requests += 1;
        stats.consecutive_failures = 0;
        stats.last_success_at = Some(Utc::now());

        let n = stats.total_requests as f64;
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        stats.avg_response_time_ms = (stats.avg_response_time_ms * (n - 1.0) + elapsed_ms) / n;

        if stats.disabled {
            info!(provider = name, file_count, "provider re-enabled after success");
            stats.disabled = false;
        }
    }

    /// Record a failed call (error, timeout or panic).
    pub fn record_failure(&self, name: &str, message: &str) {
        let mut entry = self
            .stats
            .entry(name.to_string())
            .or_insert_with(|| ProviderStats::new(name));
        let stats = entry.value_mut();

        stats.failure_count += 1;
        stats.total_requests += 1;
        stats.consecutive_failures += 1;
        stats.last_failure_at = Some(Utc::now());
        stats.last_error = Some(message.to_string());

        if !stats.disabled && stats.consecutive_failures >= self.config.disable_after_failures {
            warn!(
                provider = name,
                consecutive_failures = stats.consecutive_failures,
                "provider disabled"
            );
            stats.disabled = true;
        }
    }

    /// Whether the provider should be called at all.
    pub fn is_healthy(&self, name: &str) -> bool {
        let Some(stats) = self.stats.get(name) else {
            return true;
        };
        if stats.disabled {
            return false;
        }
        if stats.total_requests < self.config.min_observations {
            return true;
        }
        stats.success_count as f64 / stats.total_requests as f64 >= self.config.min_success_rate
    }

    /// True once enough observations exist for the average to mean something.
    pub fn has_reliable_stats(&self, name: &str) -> bool {
        self.stats
            .get(name)
            .map(|s| s.total_requests >= self.config.min_observations)
            .unwrap_or(false)
    }

    /// Twice the average response time, clamped, or the default timeout
    /// while history is thin. When the bounds are inverted the upper one
    /// wins.
    pub fn recommended_timeout(&self, name: &str) -> Duration {
        let Some(stats) = self.stats.get(name) else {
            return self.config.default_timeout;
        };
        if stats.total_requests < self.config.min_observations {
            return self.config.default_timeout;
        }
        let doubled = Duration::from_secs_f64(stats.avg_response_time_ms * 2.0 / 1000.0);
        doubled.max(self.config.min_timeout).min(self.config.max_timeout)
    }

    /// Success rate in percent. Unknown providers count as 100.
    pub fn success_rate(&self, name: &str) -> f64 {
        self.stats
            .get(name)
            .map(|s| s.success_rate())
            .unwrap_or(100.0)
    }

    pub fn get(&self, name: &str) -> Option<ProviderStats> {
        self.stats.get(name).map(|s| s.clone())
    }

    /// Copy of every row, sorted by provider name.
    pub fn snapshot(&self) -> Vec<ProviderStats> {
        let mut rows: Vec<ProviderStats> = self.stats.iter().map(|e| e.value().clone()).collect();
        rows.sort_by(|a, b| a.provider_name.cmp(&b.provider_name));
        rows
    }

    pub fn reset(&self, name: &str) {
        self.stats.remove(name);
    }

    pub fn reset_all(&self) {
        self.stats.clear();
    }

    /// Most reliable first. Ties keep their input order.
    pub fn sort_by_reliability(&self, names: &[String]) -> Vec<String> {
        let mut ranked: Vec<(f64, &String)> =
            names.iter().map(|n| (self.success_rate(n), n)).collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        ranked.into_iter().map(|(_, n)| n.clone()).collect()
    }
}
