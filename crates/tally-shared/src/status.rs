//! Derived-field rules for clients.
//!
//! Everything here works on calendar dates only. Callers pass "today" in
//! explicitly so that results are stable within a calendar day and tests
//! never depend on the wall clock.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};

use crate::constants::DUE_SOON_WINDOW_DAYS;
use crate::error::DomainError;
use crate::types::DueStatus;

/// The current local calendar date.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Whole days from `today` until `due_date`. Negative once the due date has passed.
pub fn days_remaining(due_date: NaiveDate, today: NaiveDate) -> i64 {
    due_date.signed_duration_since(today).num_days()
}

/// Map a days-remaining count onto a [`DueStatus`].
pub fn due_status(days_remaining: i64) -> DueStatus {
    match days_remaining {
        0 => DueStatus::DueToday,
        d if d < 0 => DueStatus::Overdue,
        d if d <= DUE_SOON_WINDOW_DAYS => DueStatus::DueSoon,
        _ => DueStatus::Current,
    }
}

/// Compute `(days_remaining, status)` for a due date.
pub fn derive(due_date: NaiveDate, today: NaiveDate) -> (i64, DueStatus) {
    let days = days_remaining(due_date, today);
    (days, due_status(days))
}

/// `YYYY-MM` token identifying the month that contains `date`.
pub fn month_token(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Validate a `YYYY-MM` token, returning `(year, month)`.
pub fn parse_month_token(token: &str) -> Result<(i32, u32), DomainError> {
    let invalid = || DomainError::InvalidMonthToken(token.to_string());
    let (year, month) = token.split_once('-').ok_or_else(invalid)?;
    if year.len() != 4 || month.len() != 2 {
        return Err(invalid());
    }
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    if !(1..=12).contains(&month) {
        return Err(invalid());
    }
    Ok((year, month))
}

/// Parse a due/entry date.
///
/// Accepts a bare `YYYY-MM-DD` or a full ISO-8601 timestamp. For timestamps
/// only the date part is kept: no timezone conversion happens, so
/// `2024-05-10T23:30:00Z` is the 10th, not the 11th.
pub fn parse_date(input: &str) -> Result<NaiveDate, DomainError> {
    let trimmed = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Some(prefix) = trimmed.get(..10) {
        if trimmed.len() > 10 && trimmed.as_bytes()[10] == b'T' {
            if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
                return Ok(date);
            }
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.date());
    }
    Err(DomainError::InvalidDate(input.to_string()))
}
