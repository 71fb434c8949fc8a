//! Building and unwrapping proxy URLs.

use std::collections::BTreeMap;
use url::Url;

use crate::types::{is_direct_video_path, AggregationResult, ContainerType};

/// Which proxy endpoint a URL is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRoute {
    /// `/m3u8-proxy`, for playlists
    Manifest,
    /// `/ts-proxy`, for segments, keys, init sections and direct files
    Segment,
    /// `/sub-proxy`, for subtitle files
    Subtitle,
}

impl ProxyRoute {
    pub fn path(self) -> &'static str {
        match self {
            ProxyRoute::Manifest => "/m3u8-proxy",
            ProxyRoute::Segment => "/ts-proxy",
            ProxyRoute::Subtitle => "/sub-proxy",
        }
    }
}

/// `{server_url}{path}?url=<target>[&headers=<json>]`, with the headers
/// parameter left out when there are none.
pub fn proxy_url(
    server_url: &str,
    route: ProxyRoute,
    target: &str,
    headers: &BTreeMap<String, String>,
) -> String {
    let mut out = format!(
        "{}{}?url={}",
        server_url.trim_end_matches('/'),
        route.path(),
        urlencoding::encode(target)
    );
    if !headers.is_empty() {
        // A map of strings always serializes.
        let json = serde_json::to_string(headers).unwrap_or_default();
        out.push_str("&headers=");
        out.push_str(&urlencoding::encode(&json));
    }
    out
}

/// Recover the upstream URL from a URL produced by [`proxy_url`].
pub fn target_of(proxy_url: &str) -> Option<String> {
    let parsed = Url::parse(proxy_url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.into_owned())
}

/// Strip a third-party proxy wrapper, returning the URL it points at.
/// URLs that match no known wrapper come back unchanged.
pub fn extract_original_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };

    // /proxy/<encoded url>, possibly encoded more than once
    if let Some(caps) = regex!(r"/proxy/(.+)$").captures(parsed.path()) {
        let mut decoded = decode(&caps[1]);
        let mut rounds = 0;
        while decoded.contains("%2F") && rounds < 5 {
            decoded = decode(&decoded);
            rounds += 1;
        }
        if looks_absolute(&decoded) {
            return decoded;
        }
    }

    // ?url=<encoded url>
    if let Some((_, inner)) = parsed.query_pairs().find(|(k, _)| k == "url") {
        if looks_absolute(&inner) {
            return inner.into_owned();
        }
    }

    for re in [regex!(r"/stream/proxy/(.+)$"), regex!(r"/p/(.+)$")] {
        if let Some(caps) = re.captures(url) {
            let decoded = decode(&caps[1]);
            if looks_absolute(&decoded) {
                return decoded;
            }
        }
    }

    url.to_string()
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

fn looks_absolute(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Route every file and subtitle in `result` through this service.
///
/// Playlists and URLs without a known video extension go to the manifest
/// proxy; `.mp4`, `.mkv`, `.webm` and `.avi` go to the segment proxy.
pub fn wrap_result(mut result: AggregationResult, server_url: &str) -> AggregationResult {
    for file in &mut result.files {
        let original = extract_original_url(&file.url);
        if is_direct_video_path(&original) && !original.contains("m3u8") {
            file.url = proxy_url(server_url, ProxyRoute::Segment, &original, &file.headers);
            if file.container_type == ContainerType::Hls {
                file.container_type = ContainerType::Mp4;
            }
        } else {
            file.url = proxy_url(server_url, ProxyRoute::Manifest, &original, &file.headers);
            file.container_type = ContainerType::Hls;
        }
    }
    for sub in &mut result.subtitles {
        sub.url = proxy_url(server_url, ProxyRoute::Subtitle, &sub.url, &BTreeMap::new());
    }
    result
}
