//! Media relay server
//!
//! Looks up playable sources for movies and episodes across a set of
//! providers, and proxies HLS manifests, segments and subtitles so players
//! can load them from one origin.

mod config;
mod config_file;
mod error;
mod http;
mod metrics;
mod state;

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Cli, LogFormat, ServerConfig};
use crate::config_file::ConfigFile;
use crate::error::{Result, ServerError};
use crate::http::create_router;
use crate::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "media-relay";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration before logging so the file can pick the format.
    let (mut config, load_error) = if cli.config.exists() {
        match ConfigFile::from_file(&cli.config).and_then(ConfigFile::into_server_config) {
            Ok(config) => (config, None),
            Err(e) => (ServerConfig::default(), Some(e)),
        }
    } else {
        (ServerConfig::default(), None)
    };
    config.apply_cli(&cli);

    init_logging(&config);

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    if let Some(e) = load_error {
        tracing::warn!(
            "Failed to load config file {}: {}. Using defaults.",
            cli.config.display(),
            e
        );
    }
    tracing::info!(
        providers = config.providers.len(),
        validate_sources = config.validation.probe,
        segment_cache = config.segment_cache.enabled,
        diagnostics = config.diagnostics,
        "configuration loaded"
    );
    tracing::debug!("Configuration: {:?}", config);

    // Create application state
    let state = Arc::new(AppState::new(config.clone())?);
    state.spawn_sweepers();

    // Build router
    let app = create_router(state);

    // Start server
    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| ServerError::Config(format!("bad listen address {}: {}", config.socket_addr(), e)))?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Initialize logging with tracing
fn init_logging(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.as_str().into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
