//! Candidate source validation.
//!
//! The structural check is free and always runs. Network probing costs one
//! upstream request per candidate and is off unless enabled.

use futures_util::future::join_all;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::{RelayError, Result};
use crate::types::FileSource;
use crate::upstream;

/// Substrings that mark a URL as a broken scrape result.
const DENYLIST: &[&str] = &["undefined", "null", "%7B", "%7b", "\",\""];

/// Validator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Probe candidates over the network
    pub probe: bool,

    /// Per-probe timeout in milliseconds
    pub probe_timeout_ms: u64,

    /// Probes in flight at once
    pub concurrency: usize,

    /// Stop probing once this many candidates passed; the rest are kept
    /// unprobed. `None` probes everything.
    pub early_exit_after: Option<usize>,

    /// Extra substrings to reject, on top of the built-in list
    #[serde(default)]
    pub extra_denylist: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            probe: false,
            probe_timeout_ms: 8000,
            concurrency: 5,
            early_exit_after: Some(3),
            extra_denylist: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct SourceValidator {
    client: reqwest::Client,
    config: ValidationConfig,
}

impl SourceValidator {
    pub fn new(client: reqwest::Client, config: ValidationConfig) -> Self {
        Self { client, config }
    }

    pub fn probing_enabled(&self) -> bool {
        self.config.probe
    }

    /// Cheap check, no network. Rejects non-HTTPS URLs, unparseable URLs
    /// and URLs containing placeholder garbage.
    pub fn check_structure(&self, url: &str) -> Result<()> {
        if !url.starts_with("https://") {
            return Err(RelayError::ValidationFailed(format!("not https: {}", url)));
        }
        Url::parse(url).map_err(|e| RelayError::ValidationFailed(format!("{}: {}", e, url)))?;

        if regex!(r"\{[^}]*\}").is_match(url) {
            return Err(RelayError::ValidationFailed(format!("unresolved template: {}", url)));
        }
        let bad = DENYLIST
            .iter()
            .find(|p| url.contains(**p))
            .map(|p| p.to_string())
            .or_else(|| {
                self.config
                    .extra_denylist
                    .iter()
                    .find(|p| url.contains(p.as_str()))
                    .cloned()
            });
        if let Some(bad) = bad {
            return Err(RelayError::ValidationFailed(format!("contains {:?}: {}", bad, url)));
        }
        Ok(())
    }

    /// Probe one candidate. Any error, non-2xx answer or timeout is a fail.
    pub async fn probe(&self, file: &FileSource) -> bool {
        let headers = upstream::probe_headers(&file.url, &file.headers);
        let timeout = Duration::from_millis(self.config.probe_timeout_ms);

        if file.is_hls() {
            let request = self.client.get(&file.url).headers(headers).timeout(timeout);
            let Ok(resp) = request.send().await else {
                return false;
            };
            if !resp.status().is_success() {
                return false;
            }
            if content_type(&resp).is_some_and(|ct| ct.contains("mpegurl") || ct.contains("m3u8")) {
                return true;
            }
            match tokio::time::timeout(timeout, resp.text()).await {
                Ok(Ok(body)) => body.contains("#EXTM3U") || body.contains("#EXT-X-"),
                _ => false,
            }
        } else {
            let request = self.client.head(&file.url).headers(headers).timeout(timeout);
            let Ok(resp) = request.send().await else {
                return false;
            };
            resp.status().is_success()
                && content_type(&resp)
                    .is_some_and(|ct| ct.starts_with("video/") || ct.contains("application/octet-stream"))
        }
    }

    /// Probe candidates in chunks of `concurrency`, keeping the ones that
    /// pass and preserving input order.
    pub async fn validate_all(&self, files: Vec<FileSource>) -> Vec<FileSource> {
        if !self.config.probe || files.is_empty() {
            return files;
        }
        let total = files.len();
        let chunk_size = self.config.concurrency.max(1);
        let mut valid = Vec::with_capacity(total);
        let mut pending = files.into_iter();

        loop {
            let chunk: Vec<FileSource> = pending.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            let results = join_all(chunk.iter().map(|f| self.probe(f))).await;
            for (file, ok) in chunk.into_iter().zip(results) {
                if ok {
                    debug!(provider = %file.provider_name, url = %file.url, "probe passed");
                    valid.push(file);
                } else {
                    debug!(provider = %file.provider_name, url = %file.url, "probe failed");
                }
            }
            if self.config.early_exit_after.is_some_and(|n| valid.len() >= n) {
                valid.extend(pending);
                break;
            }
        }

        info!(passed = valid.len(), total, "source validation finished");
        valid
    }
}

fn content_type(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SourceValidator {
        SourceValidator::new(reqwest::Client::new(), ValidationConfig::default())
    }

    #[test]
    fn test_structure_rejects_http() {
        assert!(validator().check_structure("http://x/y.m3u8").is_err());
    }

    #[test]
    fn test_structure_rejects_placeholders() {
        let v = validator();
        assert!(v.check_structure("https://x/y.m3u8?v={v1}").is_err());
        assert!(v.check_structure("https://tmstr.%7Bv2%7D/y.m3u8").is_err());
        assert!(v.check_structure("https://x/undefined/y.m3u8").is_err());
        assert!(v.check_structure("https://x/null").is_err());
        assert!(v.check_structure("https://x/a\",\"b").is_err());
    }

    #[test]
    fn test_structure_accepts_normal_urls() {
        let v = validator();
        assert!(v.check_structure("https://cdn.example/hls/master.m3u8?token=abc").is_ok());
        assert!(v.check_structure("https://cdn.example/video.mp4").is_ok());
    }

    #[test]
    fn test_extra_denylist() {
        let v = SourceValidator::new(
            reqwest::Client::new(),
            ValidationConfig {
                extra_denylist: vec!["badcdn.example".into()],
                ..Default::default()
            },
        );
        assert!(v.check_structure("https://badcdn.example/a.m3u8").is_err());
    }

    #[tokio::test]
    async fn test_validate_all_is_passthrough_when_disabled() {
        let files = vec![FileSource::new("p", "https://unreachable.invalid/a.m3u8")];
        let out = validator().validate_all(files.clone()).await;
        assert_eq!(out, files);
    }
}
