//! Prometheus-compatible metrics

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Write;
use std::time::{Duration, Instant};

/// Metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Server start time
    start_time: Instant,
    /// Total requests processed
    request_count: RwLock<u64>,
    /// Requests by endpoint
    requests_by_endpoint: RwLock<HashMap<String, u64>>,
    /// Proxied body bytes sent to clients, streamed or buffered
    bytes_served: RwLock<u64>,
    /// Segment cache hits
    cache_hits: RwLock<u64>,
    /// Segment cache misses
    cache_misses: RwLock<u64>,
    /// Aggregations run
    aggregations: RwLock<u64>,
    /// Aggregations that found nothing
    empty_aggregations: RwLock<u64>,
    /// Errors by type
    errors_by_type: RwLock<HashMap<String, u64>>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            request_count: RwLock::new(0),
            requests_by_endpoint: RwLock::new(HashMap::new()),
            bytes_served: RwLock::new(0),
            cache_hits: RwLock::new(0),
            cache_misses: RwLock::new(0),
            aggregations: RwLock::new(0),
            empty_aggregations: RwLock::new(0),
            errors_by_type: RwLock::new(HashMap::new()),
        }
    }

    /// Record a request
    pub fn record_request(&self, endpoint: &str) {
        *self.request_count.write() += 1;
        *self
            .requests_by_endpoint
            .write()
            .entry(endpoint.to_string())
            .or_insert(0) += 1;
    }

    /// Add proxied body bytes handed to a client.
    pub fn record_bytes(&self, bytes: u64) {
        *self.bytes_served.write() += bytes;
    }

    pub fn record_cache_hit(&self) {
        *self.cache_hits.write() += 1;
    }

    pub fn record_cache_miss(&self) {
        *self.cache_misses.write() += 1;
    }

    pub fn record_aggregation(&self, found: bool) {
        *self.aggregations.write() += 1;
        if !found {
            *self.empty_aggregations.write() += 1;
        }
    }

    /// Record error
    pub fn record_error(&self, error_type: &str) {
        *self
            .errors_by_type
            .write()
            .entry(error_type.to_string())
            .or_insert(0) += 1;
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        metric_header(&mut out, "media_relay_uptime_seconds", "Server uptime in seconds", "counter");
        let _ = writeln!(out, "media_relay_uptime_seconds {}", self.uptime_secs());

        metric_header(
            &mut out,
            "media_relay_start_time_seconds",
            "Server start time as Unix timestamp",
            "gauge",
        );
        let now = std::time::SystemTime::UNIX_EPOCH
            .elapsed()
            .unwrap_or(Duration::ZERO)
            .as_secs();
        let _ = writeln!(
            out,
            "media_relay_start_time_seconds {}",
            now.saturating_sub(self.uptime_secs())
        );

        metric_header(&mut out, "media_relay_requests_total", "Total number of HTTP requests", "counter");
        let _ = writeln!(out, "media_relay_requests_total {}", *self.request_count.read());

        metric_header(&mut out, "media_relay_requests_by_endpoint", "Requests by endpoint", "counter");
        let mut endpoints: Vec<_> = self
            .requests_by_endpoint
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        endpoints.sort();
        for (endpoint, count) in endpoints {
            let _ = writeln!(
                out,
                "media_relay_requests_by_endpoint{{endpoint=\"{}\"}} {}",
                endpoint, count
            );
        }

        metric_header(&mut out, "media_relay_bytes_served_total", "Proxied body bytes sent to clients", "counter");
        let _ = writeln!(out, "media_relay_bytes_served_total {}", *self.bytes_served.read());

        let hits = *self.cache_hits.read();
        let misses = *self.cache_misses.read();
        metric_header(&mut out, "media_relay_segment_cache_hits_total", "Segment cache hits", "counter");
        let _ = writeln!(out, "media_relay_segment_cache_hits_total {}", hits);
        metric_header(&mut out, "media_relay_segment_cache_misses_total", "Segment cache misses", "counter");
        let _ = writeln!(out, "media_relay_segment_cache_misses_total {}", misses);

        let hit_ratio = if hits + misses > 0 {
            hits as f64 / (hits + misses) as f64
        } else {
            0.0
        };
        metric_header(&mut out, "media_relay_segment_cache_hit_ratio", "Segment cache hit ratio", "gauge");
        let _ = writeln!(out, "media_relay_segment_cache_hit_ratio {:.4}", hit_ratio);

        metric_header(&mut out, "media_relay_aggregations_total", "Source aggregations run", "counter");
        let _ = writeln!(out, "media_relay_aggregations_total {}", *self.aggregations.read());
        metric_header(
            &mut out,
            "media_relay_aggregations_empty_total",
            "Source aggregations that found nothing",
            "counter",
        );
        let _ = writeln!(
            out,
            "media_relay_aggregations_empty_total {}",
            *self.empty_aggregations.read()
        );

        metric_header(&mut out, "media_relay_errors_total", "Total errors by type", "counter");
        let mut errors: Vec<_> = self
            .errors_by_type
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        errors.sort();
        for (error_type, count) in errors {
            let _ = writeln!(out, "media_relay_errors_total{{type=\"{}\"}} {}", error_type, count);
        }

        out
    }
}

fn metric_header(out: &mut String, name: &str, help: &str, kind: &str) {
    if !out.is_empty() {
        out.push('\n');
    }
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
