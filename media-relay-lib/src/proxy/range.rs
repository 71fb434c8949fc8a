//! `Range: bytes=...` handling for cached objects.

/// A satisfiable byte range, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `bytes start-end/total`
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable range: serve the whole object
    Full,
    Partial(ByteRange),
    /// Syntactically valid but outside the object: 416
    Unsatisfiable,
}

/// Resolve a `Range` header against an object of `total` bytes.
///
/// Supports a single `bytes=a-b`, `bytes=a-` or `bytes=-n`. Anything else,
/// including multi-range requests, is ignored and the full object served.
pub fn resolve(header: Option<&str>, total: u64) -> RangeRequest {
    let Some(set) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
        return RangeRequest::Full;
    };
    if set.contains(',') {
        return RangeRequest::Full;
    }
    let Some((first, last)) = set.trim().split_once('-') else {
        return RangeRequest::Full;
    };
    let (first, last) = (first.trim(), last.trim());

    let range = match (first.is_empty(), last.is_empty()) {
        // bytes=-n: the last n bytes
        (true, false) => {
            let Ok(n) = last.parse::<u64>() else {
                return RangeRequest::Full;
            };
            if n == 0 || total == 0 {
                return RangeRequest::Unsatisfiable;
            }
            ByteRange {
                start: total.saturating_sub(n),
                end: total - 1,
            }
        }
        (false, _) => {
            let Ok(start) = first.parse::<u64>() else {
                return RangeRequest::Full;
            };
            let end = if last.is_empty() {
                total.saturating_sub(1)
            } else {
                match last.parse::<u64>() {
                    Ok(end) if end >= start => end.min(total.saturating_sub(1)),
                    Ok(_) => return RangeRequest::Full,
                    Err(_) => return RangeRequest::Full,
                }
            };
            if start >= total {
                return RangeRequest::Unsatisfiable;
            }
            ByteRange { start, end }
        }
        (true, true) => return RangeRequest::Full,
    };
    RangeRequest::Partial(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_range() {
        let r = resolve(Some("bytes=100-199"), 1000);
        assert_eq!(r, RangeRequest::Partial(ByteRange { start: 100, end: 199 }));
        if let RangeRequest::Partial(r) = r {
            assert_eq!(r.len(), 100);
            assert_eq!(r.content_range(1000), "bytes 100-199/1000");
        }
    }

    #[test]
    fn test_open_and_suffix_ranges() {
        assert_eq!(
            resolve(Some("bytes=900-"), 1000),
            RangeRequest::Partial(ByteRange { start: 900, end: 999 })
        );
        assert_eq!(
            resolve(Some("bytes=-100"), 1000),
            RangeRequest::Partial(ByteRange { start: 900, end: 999 })
        );
        assert_eq!(
            resolve(Some("bytes=-5000"), 1000),
            RangeRequest::Partial(ByteRange { start: 0, end: 999 })
        );
    }

    #[test]
    fn test_end_is_clamped() {
        assert_eq!(
            resolve(Some("bytes=500-5000"), 1000),
            RangeRequest::Partial(ByteRange { start: 500, end: 999 })
        );
    }

    #[test]
    fn test_unsatisfiable() {
        assert_eq!(resolve(Some("bytes=1000-"), 1000), RangeRequest::Unsatisfiable);
        assert_eq!(resolve(Some("bytes=-0"), 1000), RangeRequest::Unsatisfiable);
    }

    #[test]
    fn test_ignored_headers() {
        assert_eq!(resolve(None, 1000), RangeRequest::Full);
        assert_eq!(resolve(Some("items=0-1"), 1000), RangeRequest::Full);
        assert_eq!(resolve(Some("bytes=0-1,5-6"), 1000), RangeRequest::Full);
        assert_eq!(resolve(Some("bytes=9-3"), 1000), RangeRequest::Full);
        assert_eq!(resolve(Some("bytes=abc-"), 1000), RangeRequest::Full);
    }
}
