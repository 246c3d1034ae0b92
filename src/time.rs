//! CF time-unit handling
//!
//! Time coordinates in NetCDF files are numbers paired with a `units`
//! attribute such as `days since 2001-04-26 00:00:00`. The converter brings
//! every time axis onto [`CANONICAL_TIME_UNITS`] with a linear transform.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat};

/// Units of every time coordinate after conversion
pub const CANONICAL_TIME_UNITS: &str = "seconds since 1970-01-01 00:00:00";

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A parsed `<unit> since <reference>` string
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfTimeUnits {
    /// Seconds per unit step
    pub seconds_per_unit: f64,
    /// Reference instant in seconds since the Unix epoch
    pub epoch_offset: f64,
}

impl CfTimeUnits {
    /// Parse CF time units; `None` when the string is not a time unit
    pub fn parse(units: &str) -> Option<Self> {
        let (unit, reference) = units.split_once(" since ")?;
        let seconds_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
            "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3_600.0,
            "days" | "day" | "d" => 86_400.0,
            _ => return None,
        };
        let reference = parse_reference(reference)?;
        Some(Self {
            seconds_per_unit,
            epoch_offset: reference.and_utc().timestamp() as f64,
        })
    }

    /// `(scale, offset)` such that `epoch_seconds = value * scale + offset`
    #[must_use]
    pub fn to_epoch_linear(self) -> (f64, f64) {
        (self.seconds_per_unit, self.epoch_offset)
    }

    /// True when values are already seconds since the Unix epoch
    #[must_use]
    pub fn is_canonical(self) -> bool {
        self.seconds_per_unit == 1.0 && self.epoch_offset == 0.0
    }
}

fn parse_reference(reference: &str) -> Option<NaiveDateTime> {
    let trimmed = reference
        .trim()
        .trim_end_matches(" UTC")
        .trim_end_matches("+00:00")
        .trim_end_matches('Z');

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Format seconds since the Unix epoch as an RFC 3339 UTC timestamp
pub fn format_epoch_seconds(seconds: f64) -> Option<String> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}
