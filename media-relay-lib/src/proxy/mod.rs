//! Delivery proxies: segments, subtitles and the URL plumbing that routes
//! clients through them.
//!
//! Handlers in this module answer with a [`ProxiedResponse`], a transport
//! neutral status + headers + body triple that the HTTP layer converts into
//! its own response type.

use bytes::Bytes;
use futures_util::stream::BoxStream;
use reqwest::header::{HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN};
use reqwest::StatusCode;

pub mod range;
mod segment;
mod subtitle;
pub mod url;

pub use segment::{SegmentProxy, X_CACHE};
pub use subtitle::serve_subtitle;

/// Body of a proxied response.
pub enum ProxyBody {
    /// Fully materialized body
    Full(Bytes),
    /// Body forwarded from upstream as it arrives
    Stream(BoxStream<'static, std::io::Result<Bytes>>),
}

impl std::fmt::Debug for ProxyBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyBody::Full(b) => write!(f, "Full({} bytes)", b.len()),
            ProxyBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

#[derive(Debug)]
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ProxyBody,
}

impl ProxiedResponse {
    pub fn full(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: ProxyBody::Full(body.into()),
        }
    }

    /// Plain-text answer for players, e.g. an upstream status passed through.
    pub fn text(status: StatusCode, message: impl Into<String>) -> Self {
        let mut headers = cors_headers();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self::full(status, headers, message.into())
    }

    /// Collect the body. Only meant for tests and small payloads.
    pub async fn into_bytes(self) -> std::io::Result<Bytes> {
        match self.body {
            ProxyBody::Full(b) => Ok(b),
            ProxyBody::Stream(mut stream) => {
                use futures_util::StreamExt;
                let mut buf = Vec::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// `Access-Control-Allow-Origin: *` and friends, on every proxy answer.
pub(crate) fn cors_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        reqwest::header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Length, Content-Range, Content-Type, Cache-Control"),
    );
    headers
}
