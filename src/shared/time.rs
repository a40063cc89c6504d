//! Usage: UTC clock and the ISO-8601 wire format used by every persisted document.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

pub(crate) fn now_utc() -> DateTime<Utc> {
    // Second precision keeps round-trips through the persisted documents exact.
    let now = Utc::now();
    Utc.timestamp_opt(now.timestamp(), 0).single().unwrap_or(now)
}

/// `2025-01-02T03:04:05Z`
pub(crate) fn to_iso_z(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Accepts RFC 3339 with `Z` or an offset; anything else is `None`.
pub(crate) fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

pub(crate) fn from_unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
