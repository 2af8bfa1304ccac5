//! `Range` header parsing for the range server (spec.md §4.7).
//!
//! Deliberately stricter than the teacher's `parse_range_header`: a
//! malformed or unsatisfiable range is reported as such rather than folded
//! into "serve the whole entry", because the wire contract requires an
//! explicit `416` in those cases.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No `Range` header, or a header this server doesn't recognize as a
    /// byte-range (e.g. a non-`bytes` unit) — served as a full `200`.
    Full,
    /// Inclusive byte range, already clamped to `size - 1`.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

pub fn parse(header: &str, size: u64) -> RangeOutcome {
    let Some(spec) = header.strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };

    if spec.contains(',') {
        // Multi-range requests are rejected outright (spec.md §4.7).
        return RangeOutcome::Unsatisfiable;
    }

    let Some((start_str, end_str)) = spec.split_once('-') else {
        return RangeOutcome::Unsatisfiable;
    };

    if start_str.is_empty() {
        // Suffix range: `bytes=-N` means the last N bytes.
        let Ok(suffix_len) = end_str.parse::<u64>() else {
            return RangeOutcome::Unsatisfiable;
        };
        if suffix_len == 0 || size == 0 {
            return RangeOutcome::Unsatisfiable;
        }
        let start = size.saturating_sub(suffix_len);
        return RangeOutcome::Partial { start, end: size - 1 };
    }

    let Ok(start) = start_str.parse::<u64>() else {
        return RangeOutcome::Unsatisfiable;
    };
    if size == 0 || start > size - 1 {
        return RangeOutcome::Unsatisfiable;
    }

    let end = if end_str.is_empty() {
        size - 1
    } else {
        match end_str.parse::<u64>() {
            Ok(e) => std::cmp::min(e, size - 1),
            Err(_) => return RangeOutcome::Unsatisfiable,
        }
    };

    if end < start {
        return RangeOutcome::Unsatisfiable;
    }

    RangeOutcome::Partial { start, end }
}
