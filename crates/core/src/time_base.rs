//! Numeric base space for time facets: datetimes map to epoch seconds and
//! ISO-8601 durations to seconds.

use serde_json::Value as JsonValue;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

pub const SECONDS_PER_YEAR: f64 = 365.25 * 86_400.0;
pub const SECONDS_PER_MONTH: f64 = 30.0 * 86_400.0;
pub const SECONDS_PER_WEEK: f64 = 7.0 * 86_400.0;
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Parses an ISO-8601 datetime to whole epoch seconds. Values without an
/// offset are taken as UTC.
pub fn parse_datetime(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(parsed) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(parsed.unix_timestamp());
    }
    let local_t = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    let local_space = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    for format in [local_t, local_space] {
        if let Ok(parsed) = PrimitiveDateTime::parse(text, format) {
            return Some(parsed.assume_utc().unix_timestamp());
        }
    }
    Date::parse(text, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|date| date.midnight().assume_utc().unix_timestamp())
}

/// Parses `PnYnMnWnDTnHnMnS` into seconds.
pub fn parse_duration(text: &str) -> Option<f64> {
    let text = text.trim();
    let (sign, body) = match text.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, text),
    };
    let body = body.strip_prefix('P')?;
    if body.is_empty() {
        return None;
    }
    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) => {
            if time.is_empty() {
                return None;
            }
            (date, Some(time))
        }
        None => (body, None),
    };
    let mut total = sum_units(
        date_part,
        &[
            ('Y', SECONDS_PER_YEAR),
            ('M', SECONDS_PER_MONTH),
            ('W', SECONDS_PER_WEEK),
            ('D', SECONDS_PER_DAY),
        ],
    )?;
    if let Some(time_part) = time_part {
        total += sum_units(time_part, &[('H', 3_600.0), ('M', 60.0), ('S', 1.0)])?;
    }
    Some(sign * total)
}

fn sum_units(part: &str, units: &[(char, f64)]) -> Option<f64> {
    let mut total = 0.0;
    let mut number = String::new();
    let mut next_unit = 0;
    for ch in part.chars() {
        if ch.is_ascii_digit() || ch == '.' || ch == ',' {
            number.push(if ch == ',' { '.' } else { ch });
            continue;
        }
        let offset = units[next_unit..].iter().position(|(unit, _)| *unit == ch)?;
        if number.is_empty() {
            return None;
        }
        let value: f64 = number.parse().ok()?;
        total += value * units[next_unit + offset].1;
        next_unit += offset + 1;
        number.clear();
    }
    if number.is_empty() { Some(total) } else { None }
}

pub fn datetime_base(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::String(text) => parse_datetime(text).map(|secs| secs as f64),
        JsonValue::Number(number) => number.as_f64(),
        _ => None,
    }
}

pub fn duration_base(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::String(text) => parse_duration(text),
        JsonValue::Number(number) => number.as_f64(),
        _ => None,
    }
}

/// Renders epoch seconds as RFC 3339, falling back to the plain number.
pub fn format_datetime(seconds: f64) -> String {
    OffsetDateTime::from_unix_timestamp(seconds.floor() as i64)
        .ok()
        .and_then(|stamp| stamp.format(&Rfc3339).ok())
        .unwrap_or_else(|| seconds.to_string())
}

pub fn format_duration(seconds: f64) -> String {
    format!("PT{}S", seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_datetimes_with_and_without_offsets() {
        assert_eq!(parse_datetime("1970-01-01T00:01:00Z"), Some(60));
        assert_eq!(parse_datetime("1970-01-01T01:00:00+01:00"), Some(0));
        assert_eq!(parse_datetime("1970-01-02T00:00:00"), Some(86_400));
        assert_eq!(parse_datetime("1970-01-02 00:00:00.250"), Some(86_400));
        assert_eq!(parse_datetime("1970-01-03"), Some(172_800));
        assert_eq!(parse_datetime("yesterday"), None);
    }

    #[test]
    fn parses_durations_with_calendar_units() {
        assert_eq!(parse_duration("PT1H30M"), Some(5_400.0));
        assert_eq!(parse_duration("P1D"), Some(86_400.0));
        assert_eq!(parse_duration("P1M"), Some(SECONDS_PER_MONTH));
        assert_eq!(parse_duration("P1Y"), Some(SECONDS_PER_YEAR));
        assert_eq!(parse_duration("P2W"), Some(2.0 * SECONDS_PER_WEEK));
        assert_eq!(parse_duration("-PT0.5S"), Some(-0.5));
        assert_eq!(parse_duration("P"), None);
        assert_eq!(parse_duration("PT"), None);
        assert_eq!(parse_duration("P1H"), None);
        assert_eq!(parse_duration("PT1S1M"), None);
    }

    #[test]
    fn formats_labels() {
        assert_eq!(format_datetime(60.0), "1970-01-01T00:01:00Z");
        assert_eq!(format_duration(5_400.0), "PT5400S");
    }
}
