//! Interval-notation durations and RFC3339 instants.
//!
//! - Durations use the `PT[nH][nM][nS]` subset of ISO 8601 (no date part).
//! - At least one component is required; `PT` alone is rejected.
//! - Parsing is pure: the same text always yields the same duration, so the
//!   ingestion path and the unvested-amount path can never disagree.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::DurationError;

static ISO_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$").expect("duration pattern is valid")
});

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 3_600;

/// Parse `PT3H`, `PT10M`, `PT168H29M58S` and friends.
pub fn parse_duration(text: &str) -> Result<Duration, DurationError> {
    let invalid = || DurationError::InvalidDurationFormat(text.to_owned());
    let caps = ISO_DURATION.captures(text.trim()).ok_or_else(invalid)?;

    let mut seconds: u64 = 0;
    let mut seen = false;
    for (idx, unit) in [(1, SECONDS_PER_HOUR), (2, SECONDS_PER_MINUTE), (3, 1)] {
        if let Some(m) = caps.get(idx) {
            seen = true;
            let n: u64 = m.as_str().parse().map_err(|_| invalid())?;
            let part = n.checked_mul(unit).ok_or_else(invalid)?;
            seconds = seconds.checked_add(part).ok_or_else(invalid)?;
        }
    }
    if !seen {
        return Err(invalid());
    }
    Ok(Duration::from_secs(seconds))
}

/// Parse an RFC3339 instant (`2023-08-29T16:53:46Z`, fractional seconds and
/// offsets allowed) into UTC.
pub fn parse_instant(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text.trim()).map(|t| t.with_timezone(&Utc))
}

/// `start + duration`, or `None` if it leaves chrono's representable range.
pub fn end_of(start: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    let d = chrono::Duration::from_std(duration).ok()?;
    start.checked_add_signed(d)
}
