//! Manifest rewriter
//!
//! Fetches an upstream HLS playlist and rewrites every URI in it so the
//! player comes back through this service for everything it loads:
//!
//! - variant playlists and `#EXT-X-MEDIA` / `#EXT-X-I-FRAME-STREAM-INF`
//!   renditions go to the manifest proxy,
//! - segments, `#EXT-X-KEY` keys and `#EXT-X-MAP` init sections go to the
//!   segment proxy.
//!
//! Relative URIs are resolved against the playlist's own URL (after
//! redirects), never against the page that linked to it.

use reqwest::header::{HeaderValue, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{RelayError, Result};
use crate::proxy::url::{proxy_url, ProxyRoute};
use crate::proxy::{cors_headers, ProxiedResponse};
use crate::upstream::{self, Escalation};

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Tags whose `URI` attribute names another playlist.
const PLAYLIST_TAGS: &[&str] = &["#EXT-X-MEDIA:", "#EXT-X-I-FRAME-STREAM-INF:"];

/// Tags whose `URI` attribute names a binary resource.
const RESOURCE_TAGS: &[&str] = &["#EXT-X-KEY:", "#EXT-X-SESSION-KEY:", "#EXT-X-MAP:"];

/// Budget for one manifest fetch attempt, body included.
pub const DEFAULT_MANIFEST_TIMEOUT: Duration = Duration::from_secs(20);

pub struct PlaylistRewriter {
    client: reqwest::Client,
    ladder: Vec<Escalation>,
    timeout: Duration,
}

impl PlaylistRewriter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            ladder: upstream::default_ladder(),
            timeout: DEFAULT_MANIFEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the header escalation ladder used for manifest fetches.
    pub fn with_ladder(mut self, ladder: Vec<Escalation>) -> Self {
        self.ladder = ladder;
        self
    }

    /// Fetch `target_url` and answer with the rewritten manifest.
    pub async fn rewrite(
        &self,
        target_url: &str,
        headers: &BTreeMap<String, String>,
        server_url: &str,
    ) -> Result<ProxiedResponse> {
        Url::parse(target_url)
            .map_err(|e| RelayError::InvalidRequest(format!("bad url {}: {}", target_url, e)))?;

        let resp = upstream::fetch_with_escalation(
            &self.client,
            target_url,
            upstream::merge_headers(headers),
            &self.ladder,
            self.timeout,
        )
        .await?;

        let base = resp.url().clone();
        let content = resp.text().await.map_err(RelayError::from_reqwest)?;
        let body = rewrite_manifest(&content, &base, headers, server_url);
        debug!(url = target_url, bytes = body.len(), "rewrote manifest");

        let mut out = cors_headers();
        out.insert(CONTENT_TYPE, HeaderValue::from_static(MANIFEST_CONTENT_TYPE));
        out.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        out.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        Ok(ProxiedResponse::full(StatusCode::OK, out, body))
    }
}

/// Rewrite manifest text. `base` is the URL the manifest was loaded from.
pub fn rewrite_manifest(
    content: &str,
    base: &Url,
    headers: &BTreeMap<String, String>,
    server_url: &str,
) -> String {
    let is_master = content.contains("#EXT-X-STREAM-INF");
    let wrap = |uri: &str, route: ProxyRoute| -> Option<String> {
        let resolved = base.join(uri).ok()?;
        // skd:// and data: URIs are not ours to fetch
        if !matches!(resolved.scheme(), "http" | "https") {
            return None;
        }
        Some(proxy_url(server_url, route, resolved.as_str(), headers))
    };

    let lines: Vec<String> = content
        .lines()
        .map(|raw| {
            let line = raw.trim();
            if line.is_empty() {
                return String::new();
            }
            if line.starts_with('#') {
                if !line.contains("URI=\"") {
                    return line.to_string();
                }
                let route = uri_route(line);
                return regex!(r#"URI="([^"]*)""#)
                    .replace_all(line, |caps: &regex::Captures| match wrap(&caps[1], route) {
                        Some(proxied) => format!("URI=\"{}\"", proxied),
                        None => caps[0].to_string(),
                    })
                    .into_owned();
            }
            let route = if is_master || line.contains("m3u8") {
                ProxyRoute::Manifest
            } else {
                ProxyRoute::Segment
            };
            wrap(line, route).unwrap_or_else(|| line.to_string())
        })
        .collect();

    let mut out = lines.join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn uri_route(line: &str) -> ProxyRoute {
    if PLAYLIST_TAGS.iter().any(|t| line.starts_with(t)) {
        ProxyRoute::Manifest
    } else if RESOURCE_TAGS.iter().any(|t| line.starts_with(t)) {
        ProxyRoute::Segment
    } else if line.contains("m3u8") {
        ProxyRoute::Manifest
    } else {
        ProxyRoute::Segment
    }
}
