//! Server configuration
//!
//! Values are layered: built-in defaults, then the TOML file, then command
//! line flags and their environment variables.

use clap::Parser;
use media_relay_lib::{
    HealthConfig, ProviderConfig, ResponseCacheConfig, SegmentCacheConfig, ValidationConfig,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Base URL used in rewritten links. When unset it is derived from
    /// `X-Forwarded-Proto` and `Host` of each request.
    pub public_url: Option<String>,

    /// Rewrite aggregated source URLs to go through this server's proxies
    pub wrap_sources: bool,

    /// Attach provider errors to results and bypass the response cache
    pub diagnostics: bool,

    /// Answer `/ts-proxy` with 404
    pub disable_segment_proxy: bool,

    /// Connect timeout for all outgoing requests, in seconds
    pub connect_timeout_secs: u64,

    /// Budget for each manifest fetch attempt, body included, in seconds
    pub manifest_timeout_secs: u64,

    /// Longest silence from a segment upstream, in seconds
    pub segment_idle_timeout_secs: u64,

    pub response_cache: ResponseCacheConfig,

    /// How often expired aggregation results are swept, in seconds
    pub response_sweep_secs: u64,

    pub segment_cache: SegmentCacheConfig,

    /// How often expired segments are swept, in seconds
    pub segment_sweep_secs: u64,

    pub validation: ValidationConfig,

    pub health: HealthConfig,

    /// Providers in declaration order
    pub providers: Vec<ProviderConfig>,

    /// Log filter used when `RUST_LOG` is not set
    pub log_level: String,

    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            public_url: None,
            wrap_sources: true,
            diagnostics: false,
            disable_segment_proxy: false,
            connect_timeout_secs: 10,
            manifest_timeout_secs: 20,
            segment_idle_timeout_secs: 30,
            response_cache: ResponseCacheConfig::default(),
            response_sweep_secs: 30 * 60,
            segment_cache: SegmentCacheConfig::default(),
            segment_sweep_secs: 60,
            validation: ValidationConfig::default(),
            health: HealthConfig::default(),
            providers: Vec::new(),
            log_level: "media_relay=info,media_relay_lib=info,tower_http=info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_secs.max(1))
    }

    pub fn segment_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.segment_idle_timeout_secs.max(1))
    }

    /// Overlay command line and environment settings.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(url) = &cli.public_url {
            self.public_url = Some(url.trim_end_matches('/').to_string());
        }
        if cli.disable_cache {
            self.response_cache.enabled = false;
            self.segment_cache.enabled = false;
        }
        if cli.disable_m3u8 {
            self.disable_segment_proxy = true;
        }
        if cli.validate_sources {
            self.validation.probe = true;
        }
        if cli.debug {
            self.diagnostics = true;
        }
        if cli.json_logs {
            self.log_format = LogFormat::Json;
        }
        if let Some(ttl) = cli.response_cache_ttl_secs {
            self.response_cache.ttl_secs = ttl;
        }
        if let Some(max) = cli.response_cache_max_entries {
            self.response_cache.max_entries = max;
        }
        if let Some(ttl) = cli.segment_cache_ttl_secs {
            self.segment_cache.ttl_secs = ttl;
        }
        if let Some(max) = cli.segment_cache_max_entries {
            self.segment_cache.max_entries = max;
        }
        if let Some(mb) = cli.segment_cache_max_memory_mb {
            self.segment_cache.max_memory_mb = mb;
        }
    }
}

/// Command line. Every flag can also come from the environment.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "media-relay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short = 'c', long, env = "CONFIG", default_value = "config.toml")]
    pub config: PathBuf,

    /// Address to bind to
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short = 'p', long, env = "PORT")]
    pub port: Option<u16>,

    /// Public base URL used in rewritten links
    #[arg(long, env = "PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Disable both the response cache and the segment cache
    #[arg(long, env = "DISABLE_CACHE")]
    pub disable_cache: bool,

    /// Disable the segment proxy
    #[arg(long, env = "DISABLE_M3U8")]
    pub disable_m3u8: bool,

    /// Probe candidate sources before returning them
    #[arg(long, env = "VALIDATE_SOURCES")]
    pub validate_sources: bool,

    /// Diagnostics mode: no response cache, provider errors in results
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// Log as JSON lines
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,

    #[arg(long, env = "RESPONSE_CACHE_TTL_SECS")]
    pub response_cache_ttl_secs: Option<u64>,

    #[arg(long, env = "RESPONSE_CACHE_MAX_ENTRIES")]
    pub response_cache_max_entries: Option<usize>,

    #[arg(long, env = "SEGMENT_CACHE_TTL_SECS")]
    pub segment_cache_ttl_secs: Option<u64>,

    #[arg(long, env = "SEGMENT_CACHE_MAX_ENTRIES")]
    pub segment_cache_max_entries: Option<usize>,

    #[arg(long, env = "SEGMENT_CACHE_MAX_MEMORY_MB")]
    pub segment_cache_max_memory_mb: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3000);
        assert!(config.wrap_sources);
        assert_eq!(config.response_cache.ttl_secs, 7200);
        assert_eq!(config.response_cache.max_entries, 2000);
        assert_eq!(config.segment_cache.max_entries, 500);
        assert_eq!(config.response_sweep_secs, 1800);
        assert!(!config.validation.probe);
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.socket_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_cli_flags_override() {
        let cli = Cli::try_parse_from([
            "media-relay",
            "--port",
            "9000",
            "--disable-cache",
            "--disable-m3u8",
            "--validate-sources",
            "--public-url",
            "https://relay.example/",
            "--segment-cache-max-memory-mb",
            "64",
        ])
        .unwrap();
        let mut config = ServerConfig::default();
        config.apply_cli(&cli);

        assert_eq!(config.port, 9000);
        assert!(!config.response_cache.enabled);
        assert!(!config.segment_cache.enabled);
        assert!(config.disable_segment_proxy);
        assert!(config.validation.probe);
        assert_eq!(config.public_url.as_deref(), Some("https://relay.example"));
        assert_eq!(config.segment_cache.max_memory_mb, 64);
        assert!(!config.diagnostics);
    }

    #[test]
    fn test_empty_cli_changes_nothing() {
        let mut config = ServerConfig::default();
        config.apply_cli(&Cli::default());
        assert_eq!(config.port, 3000);
        assert!(config.response_cache.enabled);
        assert!(config.segment_cache.enabled);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_disable_cache_turns_off_both_caches() {
        let cli = Cli::try_parse_from(["media-relay", "--disable-cache"]).unwrap();
        let mut config = ServerConfig::default();
        config.apply_cli(&cli);
        assert!(!config.response_cache.enabled);
        assert!(!config.segment_cache.enabled);
        assert!(!config.disable_segment_proxy);
    }

    #[test]
    fn test_upstream_timeouts() {
        let config = ServerConfig::default();
        assert_eq!(config.manifest_timeout(), Duration::from_secs(20));
        assert_eq!(config.segment_idle_timeout(), Duration::from_secs(30));

        let config = ServerConfig {
            manifest_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.manifest_timeout(), Duration::from_secs(1));
    }
}
