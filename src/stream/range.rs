//! `Range` header parsing
//!
//! Accepts `bytes=` headers with one or more comma-separated spans:
//! - `start-end`: inclusive span
//! - `start-`: from `start` to the last byte
//! - `-suffix`: the last `suffix` bytes
//!
//! Spans that are reversed or reach past the last byte are skipped. A
//! syntactically broken span invalidates the whole header.

/// Inclusive byte span within a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered (both ends inclusive)
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Check that the span is well ordered and lies inside `length` bytes
    pub fn fits(&self, length: u64) -> bool {
        self.start <= self.end && self.end < length
    }

    /// Value for the `content-range` header
    pub fn content_range(&self, length: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, length)
    }
}

/// Parse a `Range` header against a resource of `length` bytes
///
/// Returns `None` if the header is malformed or no span is satisfiable.
pub fn parse_range_header(header: &str, length: u64) -> Option<Vec<ByteRange>> {
    let (unit, spans) = header.trim().split_once('=')?;
    if !unit.trim().eq_ignore_ascii_case("bytes") || length == 0 {
        return None;
    }

    let mut ranges = Vec::new();
    for part in spans.split(',') {
        let (start, end) = part.trim().split_once('-')?;
        let (start, end) = (start.trim(), end.trim());

        let range = match (start.is_empty(), end.is_empty()) {
            // -suffix
            (true, false) => {
                let suffix: u64 = end.parse().ok()?;
                if suffix == 0 {
                    continue;
                }
                ByteRange::new(length.saturating_sub(suffix), length - 1)
            }
            // start-
            (false, true) => ByteRange::new(start.parse().ok()?, length - 1),
            // start-end
            (false, false) => ByteRange::new(start.parse().ok()?, end.parse().ok()?),
            (true, true) => return None,
        };

        if range.fits(length) {
            ranges.push(range);
        }
    }

    if ranges.is_empty() {
        None
    } else {
        Some(ranges)
    }
}

/// Select the span to serve for an optional `Range` header
///
/// Only the first satisfiable span is used; multipart responses are not produced.
pub fn select_range(header: Option<&str>, length: u64) -> Option<ByteRange> {
    parse_range_header(header?, length)?.into_iter().next()
}
