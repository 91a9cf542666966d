use crate::error::{Result, RevfluxError};
use chrono::{Datelike, NaiveDate};

/// Floors a date to the first day of its month.
pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    // Day 1 exists in every month, so `with_day(1)` cannot fail.
    date.with_day(1).unwrap_or(date)
}

pub fn month_start(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| RevfluxError::DateError(format!("Invalid month {}-{:02}", year, month)))
}

pub fn next_month_start(date: NaiveDate) -> Result<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };

    month_start(year, month)
}

/// Returns `count` consecutive month starts, beginning the month after `last`.
pub fn month_starts_after(last: NaiveDate, count: usize) -> Result<Vec<NaiveDate>> {
    let mut dates = Vec::with_capacity(count);
    let mut current = first_of_month(last);

    for _ in 0..count {
        current = next_month_start(current)?;
        dates.push(current);
    }

    Ok(dates)
}

/// "January 2025" style label used in summaries and reports.
pub fn format_month_year(date: NaiveDate) -> String {
    date.format("%B %Y").to_string()
}

/// Formats an amount as Indonesian rupiah with dot thousand separators,
/// e.g. `Rp 12.345.678`. Amounts are rounded to whole rupiah.
pub fn format_rupiah(amount: f64) -> String {
    let rounded = amount.round();
    let digits = format!("{:.0}", rounded.abs());

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    if rounded < 0.0 {
        format!("Rp -{}", grouped)
    } else {
        format!("Rp {}", grouped)
    }
}
