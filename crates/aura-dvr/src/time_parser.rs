//! Flexible time parser for CLI arguments.
//!
//! Supports multiple formats:
//! - `now`
//! - Unix timestamp, fractional seconds allowed: `1738944000`, `1738944000.25`
//! - Relative: `-90s`, `-30m`, `-1h`, `-2d`, `-1w`
//! - ISO 8601 / RFC 3339: `2026-02-07T17:00:00`, `2026-02-07T17:00:00+02:00`
//! - Date+time (UTC): `2026-02-07:07:00` or `2026-02-07:07:00:00`
//!
//! Durations for `--window` use the same units without the sign: `30s`,
//! `15m`, `1h`, `2d`, or bare seconds.

use aura_dvr_core::storage::{Clock, SystemClock};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// Error type for time parsing failures.
#[derive(Debug, Clone)]
pub struct TimeParseError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse time '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for TimeParseError {}

/// Current wall time in fractional unix seconds, from the store's clock.
pub fn now_seconds() -> f64 {
    SystemClock.now()
}

/// Parses a time expression into unix seconds, relative to the current time.
pub fn parse_time(input: &str) -> Result<f64, TimeParseError> {
    parse_time_with_base(input, now_seconds())
}

/// Parses a time expression using `base` for `now` and relative offsets.
pub fn parse_time_with_base(input: &str, base: f64) -> Result<f64, TimeParseError> {
    let input = input.trim();

    if input.eq_ignore_ascii_case("now") {
        return Ok(base);
    }

    if let Some(ts) = try_parse_unix_timestamp(input) {
        return Ok(ts);
    }

    if let Some(rest) = input.strip_prefix('-')
        && let Some(delta) = try_parse_duration(rest)
    {
        return Ok(base - delta);
    }

    if let Some(ts) = try_parse_iso8601(input) {
        return Ok(ts);
    }

    if let Some(ts) = try_parse_date_colon_time(input) {
        return Ok(ts);
    }

    Err(TimeParseError {
        input: input.to_string(),
        message: "Unrecognized format. Use: now, Unix timestamp (1738944000), \
                  relative (-1h, -30m, -2d), ISO 8601 (2026-02-07T17:00:00), \
                  or date:time (2026-02-07:07:00)"
            .to_string(),
    })
}

/// Parses a positive duration such as `30s`, `15m`, `1h` or `90`.
pub fn parse_duration(input: &str) -> Result<f64, TimeParseError> {
    let input = input.trim();
    match try_parse_duration(input) {
        Some(seconds) if seconds > 0.0 => Ok(seconds),
        Some(_) => Err(TimeParseError {
            input: input.to_string(),
            message: "Duration must be greater than zero".to_string(),
        }),
        None => Err(TimeParseError {
            input: input.to_string(),
            message: "Unrecognized duration. Use seconds (90) or a unit suffix (30s, 15m, 1h, 2d, 1w)"
                .to_string(),
        }),
    }
}

/// Plain number, optionally fractional. No sign, no exponent.
fn try_parse_unix_timestamp(input: &str) -> Option<f64> {
    let looks_numeric = !input.is_empty()
        && input.chars().all(|c| c.is_ascii_digit() || c == '.')
        && input.chars().filter(|c| *c == '.').count() <= 1
        && input != ".";
    if !looks_numeric {
        return None;
    }
    input.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn try_parse_duration(input: &str) -> Option<f64> {
    if let Some(seconds) = try_parse_unix_timestamp(input) {
        return Some(seconds);
    }

    let unit = input.chars().last()?;
    let number_str = &input[..input.len() - unit.len_utf8()];
    if number_str.is_empty() {
        return None;
    }
    let number: u64 = number_str.parse().ok()?;

    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        'w' => 604800,
        _ => return None,
    };

    Some(number.checked_mul(multiplier)? as f64)
}

fn try_parse_iso8601(input: &str) -> Option<f64> {
    if !input.contains('T') {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(to_seconds(&dt.with_timezone(&Utc)));
    }

    // No offset: assume UTC.
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(input, format) {
            return Some(to_seconds(&Utc.from_utc_datetime(&ndt)));
        }
    }

    None
}

/// `YYYY-MM-DD:HH:MM` or `YYYY-MM-DD:HH:MM:SS`, UTC.
fn try_parse_date_colon_time(input: &str) -> Option<f64> {
    if input.len() < 11 || !input.is_char_boundary(10) {
        return None;
    }

    let (date_part, rest) = input.split_at(10);
    let time_part = rest.strip_prefix(':')?;
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;

    let time = match time_part.len() {
        5 => NaiveTime::parse_from_str(time_part, "%H:%M").ok()?,
        8 => NaiveTime::parse_from_str(time_part, "%H:%M:%S").ok()?,
        _ => return None,
    };

    let datetime = NaiveDateTime::new(date, time);
    Some(to_seconds(&Utc.from_utc_datetime(&datetime)))
}

fn to_seconds(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp_micros() as f64 / 1_000_000.0
}
