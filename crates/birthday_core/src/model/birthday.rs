//! Birthday domain model.
//!
//! # Responsibility
//! - Define the canonical record stored for one person's birthday.
//! - Normalize names so that the natural key is stable across imports.
//!
//! # Invariants
//! - `(month, day)` is a valid calendar date in at least one year, so Feb 29
//!   is accepted as a recurring date.
//! - `year`, when set, is a year in which `(month, day)` exists.
//! - `name` is trimmed, whitespace-collapsed and title-cased.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store-assigned identifier of a birthday row.
pub type BirthdayId = i64;

// Leap year used to validate recurring month/day pairs.
const LEAP_REFERENCE_YEAR: i32 = 2000;

/// Validation failures for birthday records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BirthdayValidationError {
    #[error("name cannot be empty")]
    EmptyName,
    #[error("month must be between 1 and 12, got {0}")]
    MonthOutOfRange(u32),
    #[error("day {day} does not exist in month {month}")]
    InvalidDay { month: u32, day: u32 },
    #[error("{month:02}-{day:02} does not exist in year {year}")]
    InvalidYear { year: i32, month: u32, day: u32 },
}

/// One person's birthday.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BirthdayRecord {
    /// Display name, also the natural key once lowercased.
    pub name: String,
    /// Month number, 1-12.
    pub month: u32,
    /// Day of month, 1-31.
    pub day: u32,
    /// Birth year when known.
    pub year: Option<i32>,
}

/// Birthday record together with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredBirthday {
    pub id: BirthdayId,
    pub record: BirthdayRecord,
}

impl BirthdayRecord {
    /// Creates a validated record with a normalized name.
    ///
    /// # Errors
    /// - Returns `EmptyName` when `name` is blank.
    /// - Returns a date error when `(month, day[, year])` is not a real date.
    pub fn new(
        name: impl AsRef<str>,
        month: u32,
        day: u32,
        year: Option<i32>,
    ) -> Result<Self, BirthdayValidationError> {
        let record = Self {
            name: normalize_name(name.as_ref()),
            month,
            day,
            year,
        };
        record.validate()?;
        Ok(record)
    }

    /// Checks record invariants.
    pub fn validate(&self) -> Result<(), BirthdayValidationError> {
        if self.name.trim().is_empty() {
            return Err(BirthdayValidationError::EmptyName);
        }
        if !(1..=12).contains(&self.month) {
            return Err(BirthdayValidationError::MonthOutOfRange(self.month));
        }
        if NaiveDate::from_ymd_opt(LEAP_REFERENCE_YEAR, self.month, self.day).is_none() {
            return Err(BirthdayValidationError::InvalidDay {
                month: self.month,
                day: self.day,
            });
        }
        if let Some(year) = self.year {
            if NaiveDate::from_ymd_opt(year, self.month, self.day).is_none() {
                return Err(BirthdayValidationError::InvalidYear {
                    year,
                    month: self.month,
                    day: self.day,
                });
            }
        }
        Ok(())
    }

    /// Lowercased normalized name used for idempotent upserts.
    pub fn natural_key(&self) -> String {
        natural_key(&self.name)
    }

    pub fn is_leap_day(&self) -> bool {
        self.month == 2 && self.day == 29
    }

    /// Date the birthday is observed on in `year`.
    ///
    /// Feb 29 birthdays are observed on Feb 28 in non-leap years.
    pub fn observed_in(&self, year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day).or_else(|| {
            if self.is_leap_day() {
                NaiveDate::from_ymd_opt(year, 2, 28)
            } else {
                None
            }
        })
    }

    /// Age reached on `date`, when the birth year is known.
    pub fn age_on(&self, date: NaiveDate) -> Option<i32> {
        self.year
            .map(|year| date.year() - year)
            .filter(|age| *age >= 0)
    }
}

/// Normalizes a display name.
///
/// Trims, collapses inner whitespace, and uppercases every letter that does
/// not follow another letter (`"o'neil  mary-jane"` -> `"O'Neil Mary-Jane"`).
pub fn normalize_name(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut normalized = String::with_capacity(collapsed.len());
    let mut previous_is_letter = false;
    for c in collapsed.chars() {
        if c.is_alphabetic() {
            if previous_is_letter {
                normalized.extend(c.to_lowercase());
            } else {
                normalized.extend(c.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            normalized.push(c);
            previous_is_letter = false;
        }
    }
    normalized
}

/// Natural key for a raw or normalized name.
pub fn natural_key(name: &str) -> String {
    normalize_name(name).to_lowercase()
}

/// Returns whether `year` has a Feb 29.
pub fn is_leap_year(year: i32) -> bool {
    NaiveDate::from_ymd_opt(year, 2, 29).is_some()
}
