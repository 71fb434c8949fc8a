use futures_util::StreamExt;
use reqwest::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{cors_headers, ProxiedResponse, ProxyBody};
use crate::error::{RelayError, Result};
use crate::upstream;

/// Whole-request budget for a subtitle file, body included.
const SUBTITLE_TIMEOUT: Duration = Duration::from_secs(20);

/// Fetch a subtitle file and stream it back unchanged.
///
/// Subtitle files never reference other resources, so there is nothing to
/// rewrite. A non-2xx upstream answer is passed through with a short text
/// body rather than as an error, which is what players expect here.
pub async fn serve_subtitle(
    client: &reqwest::Client,
    target_url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<ProxiedResponse> {
    let resp = client
        .get(target_url)
        .headers(upstream::merge_headers(headers))
        .timeout(SUBTITLE_TIMEOUT)
        .send()
        .await
        .map_err(RelayError::from_reqwest)?;

    let status = resp.status();
    if !status.is_success() {
        return Ok(ProxiedResponse::text(
            status,
            format!("Subtitle fetch failed: {}", status.as_u16()),
        ));
    }

    let mut out = cors_headers();
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("text/vtt"));
    out.insert(CONTENT_TYPE, content_type);
    out.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600"));

    let body = resp
        .bytes_stream()
        .map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)))
        .boxed();

    Ok(ProxiedResponse {
        status: reqwest::StatusCode::OK,
        headers: out,
        body: ProxyBody::Stream(body),
    })
}
