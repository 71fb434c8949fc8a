//! Configuration file support
//!
//! Loads server configuration from TOML files. Every section is optional;
//! missing values keep their defaults.

use media_relay_lib::{HealthConfig, ProviderConfig, ValidationConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::config::{LogFormat, ServerConfig};
use crate::error::{Result, ServerError};

/// Configuration file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: Option<ServerSettings>,
    /// Response and segment cache settings
    pub cache: Option<CacheSettings>,
    /// Source validation settings
    pub validation: Option<ValidationSettings>,
    /// Circuit breaker settings
    pub health: Option<HealthSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
    /// Providers, in the order they are consulted
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub public_url: Option<String>,
    pub wrap_sources: Option<bool>,
    pub diagnostics: Option<bool>,
    pub disable_segment_proxy: Option<bool>,
    pub connect_timeout_secs: Option<u64>,
    pub manifest_timeout_secs: Option<u64>,
    pub segment_idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    pub response_enabled: Option<bool>,
    pub response_ttl_secs: Option<u64>,
    pub response_max_entries: Option<usize>,
    pub response_sweep_secs: Option<u64>,
    pub segment_enabled: Option<bool>,
    pub segment_ttl_secs: Option<u64>,
    pub segment_max_entries: Option<usize>,
    pub segment_max_memory_mb: Option<usize>,
    pub segment_max_entry_mb: Option<usize>,
    pub segment_sweep_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSettings {
    pub probe: Option<bool>,
    pub probe_timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    /// 0 probes every candidate
    pub early_exit_after: Option<usize>,
    pub extra_denylist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSettings {
    pub disable_after_failures: Option<u32>,
    pub min_observations: Option<u64>,
    pub min_success_rate: Option<f64>,
    pub min_timeout_ms: Option<u64>,
    pub max_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `media_relay=debug`
    pub level: Option<String>,
    /// Output format (json, pretty)
    pub format: Option<LogFormat>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Convert to ServerConfig. Fails on settings that contradict each
    /// other.
    pub fn into_server_config(self) -> Result<ServerConfig> {
        let mut config = ServerConfig::default();

        if let Some(server) = self.server {
            config.host = server.host.unwrap_or(config.host);
            config.port = server.port.unwrap_or(config.port);
            config.public_url = server
                .public_url
                .map(|u| u.trim_end_matches('/').to_string());
            config.wrap_sources = server.wrap_sources.unwrap_or(config.wrap_sources);
            config.diagnostics = server.diagnostics.unwrap_or(config.diagnostics);
            config.disable_segment_proxy = server
                .disable_segment_proxy
                .unwrap_or(config.disable_segment_proxy);
            config.connect_timeout_secs = server
                .connect_timeout_secs
                .unwrap_or(config.connect_timeout_secs);
            config.manifest_timeout_secs = server
                .manifest_timeout_secs
                .unwrap_or(config.manifest_timeout_secs);
            config.segment_idle_timeout_secs = server
                .segment_idle_timeout_secs
                .unwrap_or(config.segment_idle_timeout_secs);
        }

        if let Some(cache) = self.cache {
            let response = &mut config.response_cache;
            response.enabled = cache.response_enabled.unwrap_or(response.enabled);
            response.ttl_secs = cache.response_ttl_secs.unwrap_or(response.ttl_secs);
            response.max_entries = cache.response_max_entries.unwrap_or(response.max_entries);
            config.response_sweep_secs = cache
                .response_sweep_secs
                .unwrap_or(config.response_sweep_secs);

            let segment = &mut config.segment_cache;
            segment.enabled = cache.segment_enabled.unwrap_or(segment.enabled);
            segment.ttl_secs = cache.segment_ttl_secs.unwrap_or(segment.ttl_secs);
            segment.max_entries = cache.segment_max_entries.unwrap_or(segment.max_entries);
            segment.max_memory_mb = cache.segment_max_memory_mb.unwrap_or(segment.max_memory_mb);
            segment.max_entry_mb = cache.segment_max_entry_mb.unwrap_or(segment.max_entry_mb);
            config.segment_sweep_secs = cache
                .segment_sweep_secs
                .unwrap_or(config.segment_sweep_secs);
        }

        if let Some(v) = self.validation {
            let defaults = ValidationConfig::default();
            config.validation = ValidationConfig {
                probe: v.probe.unwrap_or(defaults.probe),
                probe_timeout_ms: v.probe_timeout_ms.unwrap_or(defaults.probe_timeout_ms),
                concurrency: v.concurrency.unwrap_or(defaults.concurrency),
                early_exit_after: match v.early_exit_after {
                    Some(0) => None,
                    Some(n) => Some(n),
                    None => defaults.early_exit_after,
                },
                extra_denylist: v.extra_denylist.unwrap_or_default(),
            };
        }

        if let Some(h) = self.health {
            let defaults = HealthConfig::default();
            config.health = HealthConfig {
                disable_after_failures: h
                    .disable_after_failures
                    .unwrap_or(defaults.disable_after_failures),
                min_observations: h.min_observations.unwrap_or(defaults.min_observations),
                min_success_rate: h.min_success_rate.unwrap_or(defaults.min_success_rate),
                min_timeout: h
                    .min_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.min_timeout),
                max_timeout: h
                    .max_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.max_timeout),
                ..defaults
            };
            if config.health.min_timeout > config.health.max_timeout {
                return Err(ServerError::Config(format!(
                    "health.min_timeout_ms ({}) is above health.max_timeout_ms ({})",
                    config.health.min_timeout.as_millis(),
                    config.health.max_timeout.as_millis()
                )));
            }
        }

        if let Some(logging) = self.logging {
            config.log_level = logging.level.unwrap_or(config.log_level);
            config.log_format = logging.format.unwrap_or(config.log_format);
        }

        config.providers = self.providers;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_relay_lib::ProviderKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[server]
port = 8080
public_url = "https://relay.example/"
manifest_timeout_secs = 8

[cache]
response_ttl_secs = 600
segment_max_memory_mb = 128

[validation]
probe = true
early_exit_after = 0

[logging]
format = "json"

[[providers]]
name = "alpha"
movie_url = "https://alpha.example/movie/{tmdb}"
tv_url = "https://alpha.example/tv/{tmdb}/{season}/{episode}"

[[providers]]
name = "subs"
kind = "subtitles"
movie_url = "https://subs.example/{imdb}"
timeout_ms = 4000
headers = { Referer = "https://subs.example/" }
"#;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_sample_file() {
        let file = write_temp(SAMPLE);
        let config = ConfigFile::from_file(file.path()).unwrap().into_server_config().unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.public_url.as_deref(), Some("https://relay.example"));
        assert_eq!(config.manifest_timeout_secs, 8);
        assert_eq!(config.segment_idle_timeout_secs, 30);
        assert_eq!(config.response_cache.ttl_secs, 600);
        assert_eq!(config.response_cache.max_entries, 2000);
        assert_eq!(config.segment_cache.max_memory_mb, 128);
        assert!(config.validation.probe);
        assert_eq!(config.validation.early_exit_after, None);
        assert_eq!(config.log_format, LogFormat::Json);

        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].name, "alpha");
        assert_eq!(config.providers[0].kind, ProviderKind::Content);
        assert_eq!(config.providers[1].kind, ProviderKind::Subtitles);
        assert_eq!(config.providers[1].timeout_ms, Some(4000));
        assert_eq!(config.providers[1].headers["Referer"], "https://subs.example/");
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let file = write_temp("");
        let config = ConfigFile::from_file(file.path()).unwrap().into_server_config().unwrap();
        assert_eq!(config.port, 3000);
        assert!(config.providers.is_empty());
        assert_eq!(config.validation.early_exit_after, Some(3));
    }

    #[test]
    fn test_inverted_health_timeouts_are_rejected() {
        let file = write_temp("[health]\nmin_timeout_ms = 40000\nmax_timeout_ms = 2000\n");
        let err = ConfigFile::from_file(file.path())
            .unwrap()
            .into_server_config()
            .unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));

        let file = write_temp("[health]\nmin_timeout_ms = 40000\n");
        let err = ConfigFile::from_file(file.path())
            .unwrap()
            .into_server_config()
            .unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));

        let file = write_temp("[health]\nmin_timeout_ms = 1000\nmax_timeout_ms = 2000\n");
        let config = ConfigFile::from_file(file.path())
            .unwrap()
            .into_server_config()
            .unwrap();
        assert_eq!(config.health.max_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_invalid_file_is_a_config_error() {
        let file = write_temp("[server]\nport = \"not a number\"\n");
        let err = ConfigFile::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let err = ConfigFile::from_file("/nonexistent/media-relay.toml").unwrap_err();
        assert!(matches!(err, ServerError::Io(_)));
    }
}
