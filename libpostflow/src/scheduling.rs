//! Scheduling and time parsing utilities
//!
//! Turns operator input such as `30m`, `tomorrow` or `2025-11-20 15:00` into
//! a point in time, and formats timestamps back for display.

use crate::{PostflowError, Result};
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};

const ABSOLUTE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"];

/// Parse a schedule string into a DateTime
///
/// Supports, in this order:
/// - `now`
/// - RFC 3339 timestamps: "2025-11-20T15:00:00Z"
/// - Local wall-clock times: "2025-11-20 15:00"
/// - Relative durations: "1h", "30m", "2d", "in 2 hours"
/// - Natural language: "tomorrow", "next monday 10am"
///
/// # Errors
///
/// Returns an error if the time format is invalid or cannot be parsed.
pub fn parse_schedule(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(PostflowError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if input.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Some(dt) = parse_local_datetime(input) {
        return Ok(dt);
    }

    let relative = input.strip_prefix("in ").unwrap_or(input);
    if let Ok(duration) = parse_duration(relative) {
        return Ok(Utc::now() + duration);
    }

    if let Ok(dt) = parse_natural_language(input) {
        return Ok(dt);
    }

    Err(PostflowError::InvalidInput(format!(
        "Could not parse schedule string: {}",
        input
    )))
}

/// Parse a duration string into a chrono::Duration
fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input).map_err(|e| {
        PostflowError::InvalidInput(format!("Could not parse duration '{}': {}", input, e))
    })?;

    let seconds = i64::try_from(std_duration.as_secs())
        .map_err(|_| PostflowError::InvalidInput("Duration out of range".to_string()))?;
    Duration::try_seconds(seconds)
        .ok_or_else(|| PostflowError::InvalidInput("Duration out of range".to_string()))
}

fn parse_local_datetime(input: &str) -> Option<DateTime<Utc>> {
    ABSOLUTE_FORMATS.iter().find_map(|format| {
        let naive = NaiveDateTime::parse_from_str(input, format).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Parse natural language time expression
fn parse_natural_language(input: &str) -> Result<DateTime<Utc>> {
    chrono_english::parse_date_string(input, Utc::now(), chrono_english::Dialect::Us)
        .map_err(|e| PostflowError::InvalidInput(format!("Could not parse time: {}", e)))
}

/// Local wall-clock rendering of a Unix timestamp.
pub fn format_timestamp(timestamp: i64) -> String {
    match Local.timestamp_opt(timestamp, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => timestamp.to_string(),
    }
}

/// Compact rendering of a signed number of seconds: `in 2h 5m`, `3m ago`.
pub fn format_relative(seconds: i64) -> String {
    let magnitude = seconds.unsigned_abs();
    let days = magnitude / 86_400;
    let hours = (magnitude % 86_400) / 3600;
    let minutes = (magnitude % 3600) / 60;

    let span = if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", magnitude)
    };

    if seconds < 0 {
        format!("{} ago", span)
    } else {
        format!("in {}", span)
    }
}
