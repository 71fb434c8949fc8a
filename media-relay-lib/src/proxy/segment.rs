use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
    ETAG, RANGE,
};
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::time::Sleep;
use tracing::debug;

use super::range::{self, RangeRequest};
use super::{cors_headers, ProxiedResponse, ProxyBody};
use crate::cache::{CachedSegment, SegmentCache};
use crate::error::{RelayError, Result};
use crate::upstream;

const DEFAULT_CONTENT_TYPE: &str = "video/mp2t";
const IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// Longest silence tolerated from an upstream, before the response headers
/// and between body chunks.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// `HIT` or `MISS`, for metrics and debugging.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Fetches single segments, keys and direct video files on behalf of the
/// client, honoring `Range` and filling the segment cache.
pub struct SegmentProxy {
    client: reqwest::Client,
    cache: Arc<SegmentCache>,
    idle_timeout: Duration,
}

impl SegmentProxy {
    pub fn new(client: reqwest::Client, cache: Arc<SegmentCache>) -> Self {
        Self {
            client,
            cache,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn cache(&self) -> &SegmentCache {
        &self.cache
    }

    /// Serve `target_url`, from cache when possible.
    ///
    /// Upstream non-2xx answers come back as `RelayError::UpstreamRejected`
    /// carrying the status to propagate; network failures and an upstream
    /// that goes silent as `RelayError::UpstreamUnreachable`.
    pub async fn serve(
        &self,
        target_url: &str,
        headers: &BTreeMap<String, String>,
        range_header: Option<&str>,
    ) -> Result<ProxiedResponse> {
        if let Some(hit) = self.cache.get(target_url) {
            debug!(url = target_url, range = ?range_header, "segment cache hit");
            return Ok(from_cache(hit, range_header));
        }

        let mut outgoing = upstream::segment_headers(headers);
        if let Some(range) = range_header {
            if let Ok(v) = HeaderValue::from_str(range) {
                outgoing.insert(RANGE, v);
            }
        }

        let request = self.client.get(target_url).headers(outgoing).send();
        let resp = tokio::time::timeout(self.idle_timeout, request)
            .await
            .map_err(|_| {
                RelayError::UpstreamUnreachable(format!(
                    "no response from {} within {}ms",
                    target_url,
                    self.idle_timeout.as_millis()
                ))
            })?
            .map_err(RelayError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            debug!(url = target_url, status = status.as_u16(), "segment upstream rejected");
            return Err(RelayError::UpstreamRejected {
                status: status.as_u16(),
                url: target_url.to_string(),
            });
        }

        let upstream_headers = resp.headers();
        let content_type = header_str(upstream_headers, &CONTENT_TYPE)
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let etag = header_str(upstream_headers, &ETAG).map(str::to_string);
        let content_length = resp.content_length();

        let mut out = cors_headers();
        for name in [CONTENT_RANGE, ACCEPT_RANGES, ETAG, CONTENT_LENGTH] {
            if let Some(v) = upstream_headers.get(&name) {
                out.insert(name, v.clone());
            }
        }
        insert_str(&mut out, CONTENT_TYPE, &content_type);
        out.insert(CACHE_CONTROL, HeaderValue::from_static(IMMUTABLE));
        out.insert(X_CACHE, HeaderValue::from_static("MISS"));

        let cacheable = range_header.is_none()
            && status == StatusCode::OK
            && self
                .cache
                .accepts(content_length.map(|n| n as usize).unwrap_or(0));

        let inner = IdleTimeout::new(resp.bytes_stream().boxed(), self.idle_timeout).boxed();
        let body = if cacheable {
            ProxyBody::Stream(
                CachingStream {
                    inner,
                    buffer: Some(BytesMut::new()),
                    expected_len: content_length,
                    limit: self.cache.config().max_entry_bytes(),
                    url: target_url.to_string(),
                    content_type,
                    etag,
                    cache: self.cache.clone(),
                    sent: 0,
                    started: Instant::now(),
                    finished: false,
                }
                .boxed(),
            )
        } else {
            ProxyBody::Stream(
                PassThrough {
                    inner,
                    url: target_url.to_string(),
                    sent: 0,
                    finished: false,
                }
                .boxed(),
            )
        };

        Ok(ProxiedResponse { status, headers: out, body })
    }
}

fn from_cache(hit: CachedSegment, range_header: Option<&str>) -> ProxiedResponse {
    let total = hit.data.len() as u64;
    let mut headers = cors_headers();
    insert_str(&mut headers, CONTENT_TYPE, &hit.content_type);
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(IMMUTABLE));
    headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
    if let Some(etag) = &hit.etag {
        insert_str(&mut headers, ETAG, etag);
    }

    match range::resolve(range_header, total) {
        RangeRequest::Full => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(total));
            ProxiedResponse::full(StatusCode::OK, headers, hit.data)
        }
        RangeRequest::Partial(r) => {
            insert_str(&mut headers, CONTENT_RANGE, &r.content_range(total));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(r.len()));
            let slice = hit.data.slice(r.start as usize..=r.end as usize);
            ProxiedResponse::full(StatusCode::PARTIAL_CONTENT, headers, slice)
        }
        RangeRequest::Unsatisfiable => {
            insert_str(&mut headers, CONTENT_RANGE, &format!("bytes */{}", total));
            ProxiedResponse::full(StatusCode::RANGE_NOT_SATISFIABLE, headers, Bytes::new())
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn insert_str(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(name, v);
    }
}

fn io_error(e: reqwest::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e)
}

type UpstreamStream = futures_util::stream::BoxStream<'static, std::io::Result<Bytes>>;

/// Upstream body with a deadline between chunks. A stalled upstream ends
/// the stream with `TimedOut` instead of holding the client forever.
struct IdleTimeout {
    inner: futures_util::stream::BoxStream<'static, reqwest::Result<Bytes>>,
    idle_for: Duration,
    deadline: Pin<Box<Sleep>>,
    expired: bool,
}

impl IdleTimeout {
    fn new(inner: futures_util::stream::BoxStream<'static, reqwest::Result<Bytes>>, idle_for: Duration) -> Self {
        Self {
            inner,
            idle_for,
            deadline: Box::pin(tokio::time::sleep(idle_for)),
            expired: false,
        }
    }
}

impl Stream for IdleTimeout {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.expired {
            return Poll::Ready(None);
        }
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(item)) => {
                let next = tokio::time::Instant::now() + this.idle_for;
                this.deadline.as_mut().reset(next);
                Poll::Ready(Some(item.map_err(io_error)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => match this.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    this.expired = true;
                    Poll::Ready(Some(Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("upstream idle for {}ms", this.idle_for.as_millis()),
                    ))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Forwards upstream chunks untouched.
struct PassThrough {
    inner: UpstreamStream,
    url: String,
    sent: u64,
    finished: bool,
}

impl Stream for PassThrough {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                debug!(url = %this.url, error = %e, "upstream stream error");
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PassThrough {
    fn drop(&mut self) {
        if !self.finished {
            debug!(url = %self.url, bytes = self.sent, "client disconnected mid-stream");
        }
    }
}

/// Forwards upstream chunks while keeping a copy. The copy goes into the
/// segment cache only if the upstream stream ends cleanly with the length
/// it announced.
struct CachingStream {
    inner: UpstreamStream,
    buffer: Option<BytesMut>,
    expected_len: Option<u64>,
    limit: usize,
    url: String,
    content_type: String,
    etag: Option<String>,
    cache: Arc<SegmentCache>,
    sent: u64,
    started: Instant,
    finished: bool,
}

impl CachingStream {
    fn store(&mut self) {
        let Some(buffer) = self.buffer.take() else {
            return;
        };
        if self.expected_len.is_some_and(|n| n != buffer.len() as u64) {
            debug!(url = %self.url, got = buffer.len(), "short upstream body, not caching");
            return;
        }
        debug!(
            url = %self.url,
            bytes = buffer.len(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "caching segment"
        );
        let segment = CachedSegment {
            data: buffer.freeze(),
            content_type: self.content_type.clone(),
            etag: self.etag.take(),
        };
        self.cache.insert(&self.url, segment);
    }
}

impl Stream for CachingStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                if let Some(buffer) = this.buffer.as_mut() {
                    if buffer.len() + chunk.len() > this.limit {
                        debug!(url = %this.url, "object exceeds cache entry limit");
                        this.buffer = None;
                    } else {
                        buffer.extend_from_slice(&chunk);
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                this.buffer = None;
                debug!(url = %this.url, error = %e, "upstream stream error");
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                if !this.finished {
                    this.finished = true;
                    this.store();
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for CachingStream {
    fn drop(&mut self) {
        if !self.finished {
            debug!(url = %self.url, bytes = self.sent, "client disconnected mid-stream, nothing cached");
        }
    }
}
