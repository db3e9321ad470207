// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Human-readable interval parsing for configuration.

use std::{fmt, time::Duration};

use serde::{Deserialize, Deserializer, de};

const SECOND_MS: f64 = 1_000.0;
const MINUTE_MS: f64 = 60.0 * SECOND_MS;
const HOUR_MS: f64 = 60.0 * MINUTE_MS;
const DAY_MS: f64 = 24.0 * HOUR_MS;
const WEEK_MS: f64 = 7.0 * DAY_MS;
const MONTH_MS: f64 = 30.0 * DAY_MS;
const YEAR_MS: f64 = 365.0 * DAY_MS;

fn unit_ms(unit: &str) -> Option<f64> {
    Some(match unit {
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => SECOND_MS,
        "m" | "min" | "mins" | "minute" | "minutes" => MINUTE_MS,
        "h" | "hr" | "hrs" | "hour" | "hours" => HOUR_MS,
        "d" | "day" | "days" => DAY_MS,
        "w" | "week" | "weeks" => WEEK_MS,
        "month" | "months" => MONTH_MS,
        "y" | "year" | "years" => YEAR_MS,
        _ => return None,
    })
}

/// Parses an interval such as `"1.5 seconds"`, `"100ms"` or `"2 days"`.
///
/// The number may be fractional and may be followed by optional whitespace and a
/// unit. A bare number is milliseconds. Returns `None` for anything else.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use stagecache::parse_interval;
///
/// assert_eq!(parse_interval("1.5 seconds"), Some(Duration::from_millis(1500)));
/// assert_eq!(parse_interval("2min"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_interval("soon"), None);
/// ```
#[must_use]
pub fn parse_interval(text: &str) -> Option<Duration> {
    let text = text.trim();
    let split = text.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    if number.is_empty() {
        return None;
    }

    let number: f64 = number.parse().ok()?;
    let unit = unit.trim_start().to_ascii_lowercase();
    let factor = if unit.is_empty() { 1.0 } else { unit_ms(&unit)? };

    let ms = (number * factor).round();
    if !ms.is_finite() || ms < 0.0 || ms >= u64::MAX as f64 {
        return None;
    }

    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "range checked above")]
    let ms = ms as u64;
    Some(Duration::from_millis(ms))
}

/// Deserializes an optional duration given as integer milliseconds or an interval string.
pub(crate) fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<IntervalSetting>::deserialize(deserializer)?
        .map(IntervalSetting::into_duration)
        .transpose()
        .map_err(de::Error::custom)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntervalSetting {
    Millis(u64),
    Text(String),
}

impl IntervalSetting {
    fn into_duration(self) -> Result<Duration, InvalidInterval> {
        match self {
            Self::Millis(ms) => Ok(Duration::from_millis(ms)),
            Self::Text(text) => parse_interval(&text).ok_or(InvalidInterval(text)),
        }
    }
}

#[derive(Debug)]
struct InvalidInterval(String);

impl fmt::Display for InvalidInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid interval '{}'", self.0)
    }
}
