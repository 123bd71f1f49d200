//! HTTP Range parsing for streaming requests (RFC 7233 subset).
//!
//! Renderers usually probe with `bytes=0-` and then seek with
//! `bytes=<offset>-`. Only a single `bytes=start-end` range is supported;
//! anything unparsable degrades to a full-content response, while a start
//! beyond the file is rejected as unsatisfiable.

/// Outcome of interpreting a request's `Range` header against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No (usable) range requested: serve the whole file with 200.
    Full,
    /// Serve `[start, end]` inclusive with 206.
    Partial { start: u64, end: u64 },
    /// Start lies beyond the file: answer 416.
    Unsatisfiable,
}

impl ByteRange {
    /// Number of bytes to serve for a file of `total` bytes.
    pub fn length(&self, total: u64) -> u64 {
        match self {
            ByteRange::Full => total,
            ByteRange::Partial { start, end } => end - start + 1,
            ByteRange::Unsatisfiable => 0,
        }
    }
}

/// Resolves an optional `Range` header value against the file size.
pub fn resolve_range(header: Option<&str>, total: u64) -> ByteRange {
    let Some(raw) = header else {
        return ByteRange::Full;
    };

    let Some(spec) = raw.strip_prefix("bytes=") else {
        return ByteRange::Full;
    };

    // Single range only; multipart ranges degrade to full content.
    if spec.contains(',') {
        return ByteRange::Full;
    }

    let Some((start_str, end_str)) = spec.split_once('-') else {
        return ByteRange::Full;
    };

    // Suffix form "bytes=-N": last N bytes.
    if start_str.is_empty() {
        return match end_str.parse::<u64>() {
            Ok(0) | Err(_) => ByteRange::Full,
            Ok(n) => ByteRange::Partial {
                start: total.saturating_sub(n),
                end: total.saturating_sub(1),
            },
        };
    }

    let Ok(start) = start_str.parse::<u64>() else {
        return ByteRange::Full;
    };

    if start >= total {
        return ByteRange::Unsatisfiable;
    }

    let end = if end_str.is_empty() {
        total - 1
    } else {
        match end_str.parse::<u64>() {
            // Clamp an overlong end to the last byte, as servers commonly do.
            Ok(e) => e.min(total - 1),
            Err(_) => total - 1,
        }
    };

    if end < start {
        return ByteRange::Full;
    }

    ByteRange::Partial { start, end }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_header_serves_full() {
        assert_eq!(resolve_range(None, 1000), ByteRange::Full);
    }

    #[test]
    fn closed_range() {
        assert_eq!(
            resolve_range(Some("bytes=100-199"), 1000),
            ByteRange::Partial { start: 100, end: 199 }
        );
    }

    #[test]
    fn open_ended_range_runs_to_eof() {
        assert_eq!(
            resolve_range(Some("bytes=500-"), 1000),
            ByteRange::Partial { start: 500, end: 999 }
        );
    }

    #[test]
    fn suffix_range_takes_tail() {
        assert_eq!(
            resolve_range(Some("bytes=-100"), 1000),
            ByteRange::Partial { start: 900, end: 999 }
        );
    }

    #[test]
    fn overlong_end_is_clamped() {
        assert_eq!(
            resolve_range(Some("bytes=0-999999"), 1000),
            ByteRange::Partial { start: 0, end: 999 }
        );
    }

    #[test]
    fn start_past_eof_is_unsatisfiable() {
        assert_eq!(resolve_range(Some("bytes=1000-"), 1000), ByteRange::Unsatisfiable);
        assert_eq!(resolve_range(Some("bytes=5000-6000"), 1000), ByteRange::Unsatisfiable);
    }

    #[test]
    fn garbage_degrades_to_full() {
        assert_eq!(resolve_range(Some("lines=1-2"), 1000), ByteRange::Full);
        assert_eq!(resolve_range(Some("bytes=abc-def"), 1000), ByteRange::Full);
        assert_eq!(resolve_range(Some("bytes=10-5"), 1000), ByteRange::Full);
        assert_eq!(resolve_range(Some("bytes=0-10,20-30"), 1000), ByteRange::Full);
    }

    #[test]
    fn length_matches_variant() {
        assert_eq!(ByteRange::Full.length(1000), 1000);
        assert_eq!(ByteRange::Partial { start: 100, end: 199 }.length(1000), 100);
        assert_eq!(ByteRange::Unsatisfiable.length(1000), 0);
    }
}
