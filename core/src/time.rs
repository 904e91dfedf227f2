//! Point-in-time normalization for borrow dates.
//!
//! Every date that enters the crate is reduced to a `NaiveDateTime` holding
//! wall-clock time. ISO strings from the API keep their wall-clock value
//! (the trailing `Z` is dropped, nothing is shifted); epoch seconds are read
//! in the local timezone.

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use serde_json::Value;

use crate::error::ApiError;

const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const SPACED_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Accepted shapes for a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeInput {
    Native(NaiveDateTime),
    Epoch(i64),
    Iso(String),
}

impl From<NaiveDateTime> for TimeInput {
    fn from(value: NaiveDateTime) -> Self {
        TimeInput::Native(value)
    }
}

impl From<i64> for TimeInput {
    fn from(value: i64) -> Self {
        TimeInput::Epoch(value)
    }
}

impl From<&str> for TimeInput {
    fn from(value: &str) -> Self {
        TimeInput::Iso(value.to_string())
    }
}

pub fn normalize(input: TimeInput) -> Result<NaiveDateTime, ApiError> {
    match input {
        TimeInput::Native(value) => Ok(value),
        TimeInput::Epoch(secs) => DateTime::from_timestamp(secs, 0)
            .map(|utc| utc.with_timezone(&Local).naive_local())
            .ok_or_else(|| ApiError::UnsupportedInput(format!("epoch {secs} out of range"))),
        TimeInput::Iso(text) => parse_utc_marked(&text),
    }
}

/// Normalize a date field taken straight from a JSON payload.
///
/// Only integers (epoch seconds) and `Z`-terminated strings are accepted.
pub fn normalize_json(value: &Value) -> Result<NaiveDateTime, ApiError> {
    match value {
        Value::Number(number) => match number.as_i64() {
            Some(secs) => normalize(TimeInput::Epoch(secs)),
            None => Err(ApiError::UnsupportedInput(number.to_string())),
        },
        Value::String(text) => normalize(TimeInput::Iso(text.clone())),
        other => Err(ApiError::UnsupportedInput(other.to_string())),
    }
}

/// Render a point in time the way the API accepts it on writes.
pub fn to_wire(value: &NaiveDateTime) -> String {
    value.format(WIRE_FORMAT).to_string()
}

/// Current local wall-clock time, truncated to whole seconds.
pub fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

fn parse_utc_marked(text: &str) -> Result<NaiveDateTime, ApiError> {
    let Some(stripped) = text.strip_suffix('Z') else {
        return Err(ApiError::UnsupportedInput(format!("{text:?} lacks a UTC marker")));
    };
    NaiveDateTime::parse_from_str(stripped, WIRE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(stripped, SPACED_FORMAT))
        .map_err(|e| ApiError::UnsupportedInput(format!("{text:?}: {e}")))
}

/// Number of days in `month` of `year`, or `None` for an invalid month.
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from(next.signed_duration_since(first).num_days()).ok()
}

/// Step back `months` calendar months from `from`.
///
/// The day of month is clamped to the length of the target month and the
/// time of day is preserved.
pub fn months_before(months: u32, from: NaiveDateTime) -> Option<NaiveDateTime> {
    if months == 0 {
        return Some(from);
    }
    let total = i64::from(from.year()) * 12 + i64::from(from.month0()) - i64::from(months);
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = total.rem_euclid(12) as u32 + 1;
    let day = from.day().min(days_in_month(year, month)?);
    NaiveDate::from_ymd_opt(year, month, day).map(|date| date.and_time(from.time()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn iso_string_keeps_wall_clock() {
        let value = normalize("2020-01-12T20:15:00Z".into()).unwrap();
        assert_eq!(value, at(2020, 1, 12, 20, 15, 0));
    }

    #[test]
    fn iso_string_with_fraction() {
        let value = normalize("2020-01-12T20:15:00.250Z".into()).unwrap();
        assert_eq!(value.nanosecond(), 250_000_000);
    }

    #[test]
    fn iso_string_without_marker_is_rejected() {
        let err = normalize("2020-01-12T20:15:00".into()).unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedInput(_)));
    }

    #[test]
    fn epoch_zero_is_local_origin() {
        let expected = DateTime::from_timestamp(0, 0)
            .unwrap()
            .with_timezone(&Local)
            .naive_local();
        assert_eq!(normalize(TimeInput::Epoch(0)).unwrap(), expected);
    }

    #[test]
    fn native_passes_through() {
        let value = at(2021, 6, 1, 8, 0, 0);
        assert_eq!(normalize(value.into()).unwrap(), value);
    }

    #[test]
    fn json_float_is_rejected() {
        let err = normalize_json(&serde_json::json!(1.5)).unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedInput(_)));
        let err = normalize_json(&serde_json::json!(true)).unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedInput(_)));
    }

    #[test]
    fn json_string_and_integer_accepted() {
        let value = normalize_json(&serde_json::json!("2020-01-12T20:15:00Z")).unwrap();
        assert_eq!(value, at(2020, 1, 12, 20, 15, 0));
        assert!(normalize_json(&serde_json::json!(86_400)).is_ok());
    }

    #[test]
    fn wire_format_has_no_zone() {
        assert_eq!(to_wire(&at(2020, 1, 12, 20, 15, 0)), "2020-01-12T20:15:00");
    }

    #[test]
    fn wire_output_round_trips_with_marker() {
        let value = at(2019, 11, 3, 7, 5, 9);
        let back = normalize(TimeInput::Iso(format!("{}Z", to_wire(&value)))).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn days_in_month_handles_leap_years() {
        assert_eq!(days_in_month(2020, 2), Some(29));
        assert_eq!(days_in_month(2019, 2), Some(28));
        assert_eq!(days_in_month(2019, 12), Some(31));
        assert_eq!(days_in_month(2019, 4), Some(30));
        assert_eq!(days_in_month(2019, 13), None);
    }

    #[test]
    fn months_before_clamps_day() {
        let from = at(2020, 3, 31, 10, 30, 0);
        assert_eq!(months_before(1, from), Some(at(2020, 2, 29, 10, 30, 0)));
    }

    #[test]
    fn months_before_crosses_year_boundary() {
        let from = at(2020, 2, 15, 0, 0, 0);
        assert_eq!(months_before(3, from), Some(at(2019, 11, 15, 0, 0, 0)));
        assert_eq!(months_before(14, from), Some(at(2018, 12, 15, 0, 0, 0)));
        assert_eq!(months_before(24, from), Some(at(2018, 2, 15, 0, 0, 0)));
    }

    #[test]
    fn months_before_out_of_range_is_none() {
        let from = at(2020, 2, 15, 0, 0, 0);
        assert_eq!(months_before(u32::MAX, from), None);
        assert_eq!(months_before(1 << 31, from), None);
    }

    #[test]
    fn months_before_zero_is_identity() {
        let from = at(2020, 2, 15, 0, 0, 0);
        assert_eq!(months_before(0, from), Some(from));
    }
}
