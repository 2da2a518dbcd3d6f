// src/util/time.rs

//! Relative datestamps and platform timestamp formatting.
//!
//! Task definitions express deadlines and expirations as offsets like
//! `"1 day"` or `"90 days"`; the platform wants absolute UTC timestamps in
//! its JSON millisecond format.

use chrono::{DateTime, Duration, Utc};

use crate::errors::{Result, TaskdagError};

/// The timestamp format the execution platform uses, e.g.
/// `2017-01-01T00:00:00.000Z`.
pub const JSON_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Parse a relative datestamp such as `"30 minutes"`, `"2 hours"`,
/// `"1 day"`, `"3 weeks"`, `"1 month"`, `"1 year"`. Months are 30 days and
/// years 365, matching the conventional platform interpretation.
pub fn parse_relative(value: &str) -> Result<Duration> {
    let mut parts = value.split_whitespace();
    let (amount, unit) = match (parts.next(), parts.next(), parts.next()) {
        (Some(amount), Some(unit), None) => (amount, unit),
        _ => return Err(bad_datestamp(value)),
    };
    let amount: i64 = amount.parse().map_err(|_| bad_datestamp(value))?;

    let duration = match unit.trim_end_matches('s') {
        "second" => Duration::seconds(amount),
        "minute" => Duration::minutes(amount),
        "hour" => Duration::hours(amount),
        "day" => Duration::days(amount),
        "week" => Duration::weeks(amount),
        "month" => Duration::days(30 * amount),
        "year" => Duration::days(365 * amount),
        _ => return Err(bad_datestamp(value)),
    };
    Ok(duration)
}

/// `now + offset`, rendered in platform JSON time.
pub fn json_time_from_now(offset: &str, now: DateTime<Utc>) -> Result<String> {
    Ok(format_time(now + parse_relative(offset)?))
}

pub fn format_time(time: DateTime<Utc>) -> String {
    time.format(JSON_TIME_FORMAT).to_string()
}

/// Parse a platform JSON timestamp back into a `DateTime`.
pub fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TaskdagError::Other(anyhow::anyhow!("invalid timestamp {value:?}: {e}")))
}

fn bad_datestamp(value: &str) -> TaskdagError {
    TaskdagError::Config(format!(
        "invalid relative datestamp {value:?} (expected e.g. \"1 day\", \"2 hours\")"
    ))
}
