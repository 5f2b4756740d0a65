//! Monday-Sunday week window and birthday matching.
//!
//! # Responsibility
//! - Compute the week containing a reference instant (UTC).
//! - Decide which recurring `(month, day)` pairs fall inside a week.
//!
//! # Invariants
//! - `start` is always a Monday and `end == start + 6 days`.
//! - Matching is evaluated per day of the window, so a week spanning a
//!   year boundary matches late-December and early-January birthdays.
//! - Feb 29 birthdays are observed on Feb 28 in non-leap years.

use crate::model::birthday::{is_leap_year, BirthdayRecord};
use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub const WEEK_LENGTH_DAYS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("week window must start on a Monday, got {date} ({weekday})")]
    NotMonday { date: NaiveDate, weekday: Weekday },
}

/// Inclusive Monday-Sunday date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WeekWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl WeekWindow {
    /// Returns the week containing `instant`, evaluated in UTC.
    pub fn containing(instant: DateTime<Utc>) -> Self {
        Self::for_date(instant.date_naive())
    }

    /// Returns the week containing the current instant.
    pub fn current() -> Self {
        Self::containing(Utc::now())
    }

    /// Returns the week containing `date`.
    pub fn for_date(date: NaiveDate) -> Self {
        let week = date.week(Weekday::Mon);
        Self {
            start: week.first_day(),
            end: week.last_day(),
        }
    }

    /// Builds a window from an explicit Monday.
    pub fn starting(monday: NaiveDate) -> Result<Self, WindowError> {
        if monday.weekday() != Weekday::Mon {
            return Err(WindowError::NotMonday {
                date: monday,
                weekday: monday.weekday(),
            });
        }
        Ok(Self::for_date(monday))
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Iterates the seven dates of the window in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        self.start.iter_days().take(WEEK_LENGTH_DAYS)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Date inside the window on which a recurring `(month, day)` is observed.
    pub fn occurrence(&self, month: u32, day: u32) -> Option<NaiveDate> {
        self.days().find(|date| observed_on(*date, month, day))
    }

    /// Occurrence of `record` inside the window.
    pub fn occurrence_of(&self, record: &BirthdayRecord) -> Option<NaiveDate> {
        self.occurrence(record.month, record.day)
    }

    pub fn matches(&self, record: &BirthdayRecord) -> bool {
        self.occurrence_of(record).is_some()
    }

    /// All `(month, day)` pairs observed inside the window.
    ///
    /// Includes `(2, 29)` when the window covers Feb 28 of a non-leap year.
    pub fn month_day_keys(&self) -> Vec<(u32, u32)> {
        let mut keys = Vec::with_capacity(WEEK_LENGTH_DAYS + 1);
        for date in self.days() {
            keys.push((date.month(), date.day()));
            if date.month() == 2 && date.day() == 28 && !is_leap_year(date.year()) {
                keys.push((2, 29));
            }
        }
        keys
    }
}

impl Display for WeekWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

fn observed_on(date: NaiveDate, month: u32, day: u32) -> bool {
    if date.month() == month && date.day() == day {
        return true;
    }
    month == 2 && day == 29 && date.month() == 2 && date.day() == 28 && !is_leap_year(date.year())
}

#[cfg(test)]
mod tests {
    use super::{WeekWindow, WindowError};
    use chrono::NaiveDate;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
    }

    #[test]
    fn sunday_belongs_to_the_preceding_monday() {
        let window = WeekWindow::for_date(date(2024, 6, 9));
        assert_eq!(window.start(), date(2024, 6, 3));
        assert_eq!(window.end(), date(2024, 6, 9));
    }

    #[test]
    fn starting_rejects_non_monday() {
        let err = WeekWindow::starting(date(2024, 6, 4)).unwrap_err();
        assert!(matches!(err, WindowError::NotMonday { .. }));
    }

    #[test]
    fn month_day_keys_add_leap_day_in_non_leap_february() {
        let window = WeekWindow::for_date(date(2025, 2, 26));
        let keys = window.month_day_keys();
        assert!(keys.contains(&(2, 28)));
        assert!(keys.contains(&(2, 29)));
        assert_eq!(keys.len(), 8);
    }

    #[test]
    fn display_uses_iso_range() {
        let window = WeekWindow::for_date(date(2024, 12, 31));
        assert_eq!(window.to_string(), "2024-12-30..2025-01-05");
    }
}
