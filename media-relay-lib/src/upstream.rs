//! Outgoing HTTP helpers shared by the validator and the proxies.
//!
//! Upstream CDNs are picky about the headers they see. Callers hand us a
//! plain `name -> value` map (usually decoded from a `headers=` query
//! parameter) and these helpers turn it into a [`HeaderMap`] with a browser
//! User-Agent underneath.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ORIGIN, REFERER, USER_AGENT};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{RelayError, Result};

/// Chrome-like User-Agent sent when the caller does not provide one.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const SEC_FETCH_DEST: &str = "sec-fetch-dest";
const SEC_FETCH_MODE: &str = "sec-fetch-mode";
const SEC_FETCH_SITE: &str = "sec-fetch-site";

/// Build the shared outgoing client.
pub fn build_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| RelayError::Config(format!("http client: {}", e)))
}

/// Default User-Agent overlaid with the caller's headers. Names or values
/// that are not valid HTTP are dropped.
pub fn merge_headers(caller: &BTreeMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    for (name, value) in caller {
        let parsed = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        );
        match parsed {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!(header = %name, "dropping invalid header"),
        }
    }
    headers
}

/// Headers for segment fetches: `Accept: */*`, caller headers, and no
/// `Sec-Fetch-*` headers, which some CDNs reject for media requests.
pub fn segment_headers(caller: &BTreeMap<String, String>) -> HeaderMap {
    let mut headers = merge_headers(caller);
    if !headers.contains_key(ACCEPT) {
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    }
    for name in [SEC_FETCH_DEST, SEC_FETCH_MODE, SEC_FETCH_SITE] {
        headers.remove(name);
    }
    headers
}

/// Headers for validation probes. `Referer` and `Origin` default to the
/// target's own origin unless the caller set them.
pub fn probe_headers(target: &str, caller: &BTreeMap<String, String>) -> HeaderMap {
    let mut headers = merge_headers(caller);
    if let Some(origin) = origin_of(target) {
        if !headers.contains_key(REFERER) {
            if let Ok(v) = HeaderValue::from_str(&origin) {
                headers.insert(REFERER, v);
            }
        }
        if !headers.contains_key(ORIGIN) {
            if let Ok(v) = HeaderValue::from_str(&origin) {
                headers.insert(ORIGIN, v);
            }
        }
    }
    headers
}

/// Decode a `headers=` query parameter (a JSON object of strings).
/// Anything unparseable yields an empty map.
pub fn parse_headers_param(param: Option<&str>) -> BTreeMap<String, String> {
    let Some(raw) = param.filter(|s| !s.trim().is_empty()) else {
        return BTreeMap::new();
    };
    match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(raw) {
        Ok(map) => map
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k, s)),
                serde_json::Value::Null => None,
                other => Some((k, other.to_string())),
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "failed to parse headers parameter");
            BTreeMap::new()
        }
    }
}

/// `scheme://host[:port]` of a URL, if it has one.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// One step of the retry ladder. Steps are applied cumulatively: attempt
/// `n` sends the base headers with steps `0..=n` applied.
#[derive(Clone, Copy)]
pub struct Escalation {
    pub name: &'static str,
    pub apply: fn(&mut HeaderMap),
}

impl std::fmt::Debug for Escalation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

fn as_given(_: &mut HeaderMap) {}

fn force_user_agent(headers: &mut HeaderMap) {
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
}

fn sec_fetch(headers: &mut HeaderMap) {
    headers.insert(SEC_FETCH_DEST, HeaderValue::from_static("empty"));
    headers.insert(SEC_FETCH_MODE, HeaderValue::from_static("cors"));
    headers.insert(SEC_FETCH_SITE, HeaderValue::from_static("cross-site"));
}

fn origin_from_referer(headers: &mut HeaderMap) {
    let origin = headers
        .get(REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(origin_of)
        .and_then(|o| HeaderValue::from_str(&o).ok());
    if let Some(origin) = origin {
        headers.insert(ORIGIN, origin);
    }
    sec_fetch(headers);
}

fn null_origin(headers: &mut HeaderMap) {
    headers.insert(ORIGIN, HeaderValue::from_static("null"));
    sec_fetch(headers);
}

/// The default ladder for manifest fetches.
pub fn default_ladder() -> Vec<Escalation> {
    vec![
        Escalation {
            name: "as-given",
            apply: as_given,
        },
        Escalation {
            name: "force-user-agent",
            apply: force_user_agent,
        },
        Escalation {
            name: "origin-from-referer",
            apply: origin_from_referer,
        },
        Escalation {
            name: "null-origin",
            apply: null_origin,
        },
    ]
}

/// GET `url`, escalating headers until the upstream answers 2xx.
///
/// Each attempt is bounded by `timeout`, which covers reading the body of
/// the returned response as well. Returns the first successful response, or
/// the error of the last attempt.
pub async fn fetch_with_escalation(
    client: &reqwest::Client,
    url: &str,
    base: HeaderMap,
    ladder: &[Escalation],
    timeout: Duration,
) -> Result<reqwest::Response> {
    let mut headers = base;
    let mut last_err = RelayError::UpstreamUnreachable(format!("no attempts made for {}", url));

    for (attempt, step) in ladder.iter().enumerate() {
        (step.apply)(&mut headers);
        match client.get(url).headers(headers.clone()).timeout(timeout).send().await {
            Ok(resp) if resp.status().is_success() => {
                if attempt > 0 {
                    debug!(url, step = step.name, attempt = attempt + 1, "upstream accepted escalated headers");
                }
                return Ok(resp);
            }
            Ok(resp) => {
                debug!(url, step = step.name, status = resp.status().as_u16(), "upstream rejected attempt");
                last_err = RelayError::UpstreamRejected {
                    status: resp.status().as_u16(),
                    url: url.to_string(),
                };
            }
            Err(e) => {
                debug!(url, step = step.name, error = %e, "upstream attempt failed");
                last_err = RelayError::from_reqwest(e);
            }
        }
    }

    Err(last_err)
}
