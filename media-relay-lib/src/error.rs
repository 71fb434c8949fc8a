use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for the relay core
#[derive(Error, Debug)]
pub enum RelayError {
    /// A provider did not answer within its timeout budget
    #[error("Provider {provider} timed out after {elapsed_ms}ms")]
    ProviderTimeout { provider: String, elapsed_ms: u64 },

    /// A provider failed at the network level
    #[error("Provider {provider} network error: {reason}")]
    ProviderNetwork { provider: String, reason: String },

    /// A provider answered with data that could not be understood
    #[error("Provider {provider} returned malformed data: {reason}")]
    ProviderParse { provider: String, reason: String },

    /// Every provider failed or returned nothing
    #[error("No sources found")]
    NoSourcesFound,

    /// Upstream answered with a non-2xx status after every retry step
    #[error("Upstream rejected {url} with status {status}")]
    UpstreamRejected { status: u16, url: String },

    /// Upstream could not be reached (connect error, reset, timeout)
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// A candidate source was dropped by the validator
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A required request parameter is missing or malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    /// HTTP status a proxy endpoint should answer with for this error.
    pub fn proxy_status(&self) -> u16 {
        match self {
            RelayError::UpstreamRejected { status, .. } => *status,
            RelayError::InvalidRequest(_) => 400,
            _ => 500,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return RelayError::UpstreamRejected {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        RelayError::UpstreamUnreachable(err.to_string())
    }
}

/// Classification of a single provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderErrorKind {
    Timeout,
    Network,
    Parse,
    /// Not invoked because the health tracker marked the provider unhealthy
    Skipped,
    /// The provider future panicked
    Panicked,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::Parse => "parse",
            ProviderErrorKind::Skipped => "skipped",
            ProviderErrorKind::Panicked => "panicked",
        };
        f.write_str(s)
    }
}

/// A provider-level failure. Never propagated to the HTTP layer directly;
/// it becomes a health observation and, in diagnostics mode, part of the
/// aggregation result.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{provider_name} ({kind}): {message}")]
#[serde(rename_all = "camelCase")]
pub struct ProviderError {
    pub provider_name: String,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: &str, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider_name: provider.to_string(),
            kind,
            message: message.into(),
        }
    }

    pub fn network(provider: &str, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Network, message)
    }

    pub fn parse(provider: &str, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Parse, message)
    }
}

impl From<ProviderError> for RelayError {
    fn from(err: ProviderError) -> Self {
        match err.kind {
            ProviderErrorKind::Parse => RelayError::ProviderParse {
                provider: err.provider_name,
                reason: err.message,
            },
            ProviderErrorKind::Timeout => RelayError::ProviderTimeout {
                provider: err.provider_name,
                elapsed_ms: 0,
            },
            _ => RelayError::ProviderNetwork {
                provider: err.provider_name,
                reason: err.message,
            },
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_status_mapping() {
        let rejected = RelayError::UpstreamRejected {
            status: 403,
            url: "https://cdn.example/a.m3u8".to_string(),
        };
        assert_eq!(rejected.proxy_status(), 403);
        assert_eq!(
            RelayError::UpstreamUnreachable("reset".into()).proxy_status(),
            500
        );
        assert_eq!(RelayError::InvalidRequest("url".into()).proxy_status(), 400);
    }

    #[test]
    fn test_provider_error_serializes_camel_case() {
        let err = ProviderError::parse("alpha", "unexpected token");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["providerName"], "alpha");
        assert_eq!(json["kind"], "parse");
    }
}
