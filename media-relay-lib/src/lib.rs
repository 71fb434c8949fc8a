//! Media source aggregation and streaming relay.
//!
//! The crate has two halves. The aggregation side asks every configured
//! [`Provider`] for playable files in parallel, guarded by per-provider
//! timeouts and a health circuit breaker, then merges, deduplicates,
//! validates and caches the result. The delivery side rewrites HLS
//! manifests so every nested URI points back at this service, and proxies
//! segments with Range support and an in-memory cache.

#[macro_use]
mod macros;

pub mod cache;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod playlist;
pub mod provider;
pub mod proxy;
pub mod types;
pub mod upstream;
pub mod validate;

#[cfg(test)]
pub(crate) mod tests;

pub use cache::{ResponseCache, ResponseCacheConfig, SegmentCache, SegmentCacheConfig};
pub use error::{ProviderError, ProviderErrorKind, RelayError, Result};
pub use health::{HealthConfig, ProviderHealthTracker, ProviderStats};
pub use orchestrator::{Orchestrator, OrchestratorConfig, ProviderReport};
pub use playlist::PlaylistRewriter;
pub use provider::{HttpJsonProvider, Provider, ProviderConfig, ProviderKind, RegisteredProvider};
pub use proxy::{ProxiedResponse, ProxyBody, SegmentProxy};
pub use types::*;
pub use validate::{SourceValidator, ValidationConfig};
