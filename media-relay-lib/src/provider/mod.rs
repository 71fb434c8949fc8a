//! The seam between the aggregation core and the sites it scrapes.
//!
//! A provider turns a [`MediaRequest`] into zero or more playable files.
//! Site-specific scrapers live outside this crate; the only implementation
//! shipped here is [`HttpJsonProvider`], a generic adapter for JSON APIs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProviderError;
use crate::types::{MediaRequest, ProviderResult};

mod http_json;

pub use http_json::{HttpJsonProvider, ProviderConfig};

/// Default timeout for content providers.
pub const DEFAULT_CONTENT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default timeout for subtitle-only providers.
pub const DEFAULT_SUBTITLE_TIMEOUT: Duration = Duration::from_secs(10);

/// A source of playable files for a piece of media.
///
/// Implementations must be cancel-safe: the orchestrator drops the future
/// when the provider's timeout expires.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    /// Stable name used for health tracking, dedup and diagnostics.
    fn name(&self) -> &str;

    /// Whether this provider can answer `request` at all. The orchestrator
    /// leaves unsupported requests out entirely: no call, no health
    /// observation, no diagnostics entry.
    fn supports(&self, _request: &MediaRequest) -> bool {
        true
    }

    /// Look up playable files and subtitles for `request`.
    ///
    /// # Errors
    /// - `ProviderErrorKind::Network` - the upstream could not be reached
    /// - `ProviderErrorKind::Parse` - the upstream answered with garbage
    async fn fetch_sources(&self, request: &MediaRequest)
        -> Result<ProviderResult, ProviderError>;
}

/// What a provider contributes. Both kinds run the same way; they differ in
/// default timeout and in whether recommended timeouts apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Content,
    Subtitles,
}

impl ProviderKind {
    pub fn default_timeout(self) -> Duration {
        match self {
            ProviderKind::Content => DEFAULT_CONTENT_TIMEOUT,
            ProviderKind::Subtitles => DEFAULT_SUBTITLE_TIMEOUT,
        }
    }
}

/// A provider as the orchestrator sees it. The registration order is the
/// dedup tie-break: earlier providers win.
#[derive(Debug, Clone)]
pub struct RegisteredProvider {
    pub provider: Arc<dyn Provider>,
    pub kind: ProviderKind,
    pub default_timeout: Duration,
}

impl RegisteredProvider {
    pub fn content(provider: Arc<dyn Provider>) -> Self {
        Self::new(provider, ProviderKind::Content)
    }

    pub fn subtitles(provider: Arc<dyn Provider>) -> Self {
        Self::new(provider, ProviderKind::Subtitles)
    }

    pub fn new(provider: Arc<dyn Provider>, kind: ProviderKind) -> Self {
        Self {
            provider,
            kind,
            default_timeout: kind.default_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }
}
