//! In-memory caches.
//!
//! - [`ResponseCache`] holds finished aggregation results keyed by media.
//! - [`SegmentCache`] holds raw bytes fetched by the segment proxy, keyed by
//!   upstream URL.
//!
//! Neither cache survives a restart.

mod response;
mod segment;

pub use response::{ResponseCache, ResponseCacheConfig, ResponseCacheStats};
pub use segment::{CachedSegment, SegmentCache, SegmentCacheConfig, SegmentCacheStats};
