use chrono::{DateTime, TimeZone, Utc};

/// Providers disagree on units: Meta sends milliseconds, some gateways send
/// seconds. Anything below 10^11 is treated as seconds.
pub fn from_unix_flexible(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() < 100_000_000_000 {
        Utc.timestamp_opt(value, 0).single()
    } else {
        Utc.timestamp_millis_opt(value).single()
    }
}

pub fn from_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
