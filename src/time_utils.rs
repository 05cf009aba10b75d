// SPDX-License-Identifier: MIT

//! Small RFC 3339 helpers shared by storage and providers.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format an instant as RFC 3339 with whole-second precision (UTC).
pub fn format_utc_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 string into a UTC instant.
pub fn parse_utc_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trip() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let s = format_utc_rfc3339(ts);
        assert_eq!(parse_utc_rfc3339(&s), Some(ts));
    }

    #[test]
    fn offset_is_normalized_to_utc() {
        let parsed = parse_utc_rfc3339("2026-03-14T10:26:53+01:00").unwrap();
        assert_eq!(format_utc_rfc3339(parsed), "2026-03-14T09:26:53Z");
    }
}
