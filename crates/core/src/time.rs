use chrono::{DateTime, SecondsFormat, Utc};

/// Current UTC time as ISO-8601 with millisecond precision and a `Z` suffix,
/// e.g. `2024-03-01T07:15:42.318Z`.
pub fn now_utc_iso() -> String {
    format_utc_iso(Utc::now())
}

pub fn format_utc_iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
