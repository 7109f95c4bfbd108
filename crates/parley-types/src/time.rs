use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

/// Parse a timestamp stored by SQLite.
///
/// SQLite's `datetime('now')` writes "YYYY-MM-DD HH:MM:SS" without a
/// timezone; rows written elsewhere may carry full RFC 3339. Try RFC 3339
/// first, then parse as naive UTC.
pub fn parse_db_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

/// Format a timestamp the way SQLite's `datetime('now')` stores them, so
/// that range comparisons against stored text stay lexicographic.
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_sqlite_default_format() {
        let ts = parse_db_timestamp("2026-03-01 12:30:45");
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 45).unwrap());
    }

    #[test]
    fn parses_rfc3339() {
        let ts = parse_db_timestamp("2026-03-01T12:30:45Z");
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 45).unwrap());
    }

    #[test]
    fn round_trips_through_db_format() {
        let ts = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(parse_db_timestamp(&to_db_timestamp(ts)), ts);
    }
}
