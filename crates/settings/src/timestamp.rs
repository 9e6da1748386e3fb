// crates/settings/src/timestamp.rs
//! Timestamp parsing, formatting and ordering

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use std::cmp::Ordering;

/// Formats a timestamp for the wire (RFC 3339, UTC, lossless precision)
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parses a wire timestamp
///
/// Accepts RFC 3339 strings and integer milliseconds since the Unix epoch.
/// Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    raw.parse::<i64>()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
}

/// Orders two optional timestamps
///
/// A missing timestamp is strictly older than any present one. Two missing
/// timestamps, or two equal ones, compare as `Equal`; callers break that tie
/// with another signal such as the document version.
pub fn compare_timestamps(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Orders two optional wire timestamps; unparseable values count as missing
pub fn compare_timestamp_strs(a: Option<&str>, b: Option<&str>) -> Ordering {
    compare_timestamps(a.and_then(parse_timestamp), b.and_then(parse_timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_compare_present() {
        assert_eq!(compare_timestamps(Some(ts(2)), Some(ts(1))), Ordering::Greater);
        assert_eq!(compare_timestamps(Some(ts(1)), Some(ts(2))), Ordering::Less);
        assert_eq!(compare_timestamps(Some(ts(1)), Some(ts(1))), Ordering::Equal);
    }

    #[test]
    fn test_missing_is_older() {
        assert_eq!(compare_timestamps(Some(ts(0)), None), Ordering::Greater);
        assert_eq!(compare_timestamps(None, Some(ts(0))), Ordering::Less);
        assert_eq!(compare_timestamps(None, None), Ordering::Equal);
    }

    #[test]
    fn test_unparseable_is_older() {
        assert_eq!(
            compare_timestamp_strs(Some("not a date"), Some("2024-01-01T00:00:00Z")),
            Ordering::Less
        );
        assert_eq!(
            compare_timestamp_strs(Some("garbage"), None),
            Ordering::Equal
        );
    }

    #[test]
    fn test_parse_epoch_millis() {
        assert_eq!(parse_timestamp("1000"), Some(ts(1)));
        assert_eq!(parse_timestamp("   "), None);
    }

    #[test]
    fn test_format_parse_roundtrip_keeps_precision() {
        let original = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let text = format_timestamp(&original);
        assert_eq!(parse_timestamp(&text), Some(original));
    }

    #[test]
    fn test_offsets_normalized() {
        let a = parse_timestamp("2024-01-01T02:00:00+02:00").unwrap();
        let b = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(a, b);
    }
}
