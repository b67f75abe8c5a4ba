//! Helpers for the time formats stored in activity records.
//!
//! Activities keep their time of day in 12-hour display form (`9:05 AM`),
//! while the form input and every chronological comparison work with the
//! 24-hour `HH:MM` form. The helpers here convert between the two and rebuild
//! a local wall-clock instant from the stored `date` + `time` pair.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;

static DISPLAY_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d{1,2}):(\d{2})(?:\s*(AM|PM))?\s*$").expect("valid display time regex")
});

static INPUT_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,2}):(\d{2})\s*$").expect("valid input time regex"));

/// Parses a 24-hour `HH:MM` input value.
pub fn parse_input_time(value: &str) -> Option<NaiveTime> {
    let captures = INPUT_TIME_RE.captures(value)?;
    let hours: u32 = captures[1].parse().ok()?;
    let minutes: u32 = captures[2].parse().ok()?;
    NaiveTime::from_hms_opt(hours, minutes, 0)
}

/// Formats a time of day the way activity records store it: `H:MM AM|PM`.
pub fn format_display_time(time: NaiveTime) -> String {
    let hours = time.hour();
    let period = if hours >= 12 { "PM" } else { "AM" };
    let display_hours = match hours % 12 {
        0 => 12,
        other => other,
    };
    format!("{}:{} {}", display_hours, time.format("%M"), period)
}

/// Converts a 24-hour `HH:MM` input into the stored 12-hour form.
pub fn to_display_time(input: &str) -> Option<String> {
    parse_input_time(input).map(format_display_time)
}

/// Parses a stored display time back into a time of day.
///
/// Values without an AM/PM marker are read as 24-hour times.
pub fn parse_display_time(value: &str) -> Option<NaiveTime> {
    let captures = DISPLAY_TIME_RE.captures(value)?;
    let mut hours: u32 = captures[1].parse().ok()?;
    let minutes: u32 = captures[2].parse().ok()?;

    match captures.get(3).map(|m| m.as_str().to_ascii_uppercase()) {
        Some(period) => {
            if !(1..=12).contains(&hours) {
                return None;
            }
            if period == "PM" && hours != 12 {
                hours += 12;
            } else if period == "AM" && hours == 12 {
                hours = 0;
            }
        }
        None => {
            if hours > 23 {
                return None;
            }
        }
    }

    NaiveTime::from_hms_opt(hours, minutes, 0)
}

/// Converts a stored 12-hour display time back to zero-padded `HH:MM`.
pub fn to_24_hour(value: &str) -> Option<String> {
    parse_display_time(value).map(|time| time.format("%H:%M").to_string())
}

/// Parses an ISO `YYYY-MM-DD` calendar date.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Rebuilds the local wall-clock instant of a stored `date` + display `time`.
pub fn activity_instant(date: &str, display_time: &str) -> Option<NaiveDateTime> {
    let date = parse_date(date)?;
    let time = parse_display_time(display_time)?;
    Some(date.and_time(time))
}
