use crate::errors::{AppError, AppResult};
use crate::models::{Activity, CalendarDay, MonthView};
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

const MONTH_NAMES: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];

/// Moves `(year, month)` by `delta` months.
pub fn shift_month(year: i32, month: u32, delta: i32) -> AppResult<(i32, u32)> {
    if !(1..=12).contains(&month) {
        return Err(AppError::Validation(format!("invalid month {month}, expected 1-12")));
    }
    let month_index = i32::try_from(month - 1)
        .map_err(|_| AppError::Validation(format!("invalid month {month}, expected 1-12")))?;
    let index = year
        .checked_mul(12)
        .and_then(|base| base.checked_add(month_index))
        .and_then(|index| index.checked_add(delta))
        .ok_or_else(|| AppError::Validation(format!("month {year}-{month:02} shifted by {delta} is out of range")))?;
    Ok((index.div_euclid(12), index.rem_euclid(12).unsigned_abs() + 1))
}

pub fn month_title(year: i32, month: u32) -> String {
    let name = MONTH_NAMES
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or_default();
    format!("{name} de {year}")
}

/// Builds the grid for one month, Sunday-first, marking days that carry
/// activities and the current day.
pub fn month_view(year: i32, month: u32, activities: &[Activity], today: NaiveDate) -> AppResult<MonthView> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AppError::Validation(format!("invalid month {year}-{month:02}")))?;
    let (next_year, next_month) = shift_month(year, month, 1)?;
    let next_first = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .ok_or_else(|| AppError::Validation(format!("month {year}-{month:02} is out of range")))?;
    let days_in_month = (next_first - first).num_days() as u32;

    let mut counts: HashMap<NaiveDate, usize> = HashMap::new();
    for date in activities.iter().filter_map(Activity::date_value) {
        *counts.entry(date).or_default() += 1;
    }

    let days = (1..=days_in_month)
        .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
        .map(|date| CalendarDay {
            day: date.day(),
            date,
            activity_count: counts.get(&date).copied().unwrap_or(0),
            is_today: date == today,
        })
        .collect();

    Ok(MonthView {
        year,
        month,
        title: month_title(year, month),
        leading_blanks: first.weekday().num_days_from_sunday(),
        days,
    })
}
