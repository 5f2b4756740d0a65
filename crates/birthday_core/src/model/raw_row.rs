//! Spreadsheet row model and per-row validation.
//!
//! # Responsibility
//! - Represent one not-yet-validated row from the spreadsheet source.
//! - Convert a row into a store write operation or a row-level rejection.
//!
//! # Invariants
//! - Validation never panics and never aborts a load; it only classifies.
//! - `row` always refers to the 1-based source row for error reporting.

use crate::model::birthday::{BirthdayRecord, BirthdayValidationError};
use crate::repo::birthday_repo::BatchOp;
use chrono::Month;
use serde::Serialize;
use thiserror::Error;

/// Requested change for one spreadsheet row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowAction {
    Add,
    Delete,
}

/// One normalized spreadsheet row. All value fields are raw text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based source row number.
    pub row: usize,
    pub name: Option<String>,
    /// Month number or English month name.
    pub month: Option<String>,
    pub day: Option<String>,
    pub year: Option<String>,
    /// Combined date (`YYYY-MM-DD`, `MM-DD-YYYY`, `MM/DD/YYYY` or `MM-DD`),
    /// used when `month`/`day` are blank.
    pub date: Option<String>,
    /// `add` (default) or `delete`.
    pub action: Option<String>,
}

/// Row-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("missing name")]
    MissingName,
    #[error("missing `{0}` value")]
    MissingField(&'static str),
    #[error("invalid `{field}` value `{value}`")]
    InvalidNumber { field: &'static str, value: String },
    #[error("unknown month `{0}`")]
    UnknownMonth(String),
    #[error("unrecognized date `{0}`")]
    InvalidDate(String),
    #[error("unknown action `{0}`; expected add|delete")]
    UnknownAction(String),
    #[error(transparent)]
    Invalid(#[from] BirthdayValidationError),
}

/// Row rejected during validation, reported back to the loader caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("row {row}: {reason}")]
pub struct RejectedRow {
    pub row: usize,
    pub reason: RowError,
}

impl RawRow {
    /// Builds an `add` row from already-split values.
    pub fn new(
        row: usize,
        name: impl Into<String>,
        month: impl Into<String>,
        day: impl Into<String>,
    ) -> Self {
        Self {
            row,
            name: Some(name.into()),
            month: Some(month.into()),
            day: Some(day.into()),
            year: None,
            date: None,
            action: None,
        }
    }

    pub fn with_year(mut self, year: impl Into<String>) -> Self {
        self.year = Some(year.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Parses the requested action, defaulting to `add` when blank.
    pub fn action(&self) -> Result<RowAction, RowError> {
        match non_blank(&self.action) {
            None => Ok(RowAction::Add),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "add" | "upsert" => Ok(RowAction::Add),
                "delete" | "remove" => Ok(RowAction::Delete),
                _ => Err(RowError::UnknownAction(value.to_string())),
            },
        }
    }

    /// Validates the row and converts it into a store write operation.
    ///
    /// Delete rows only need a name; add rows need a full valid date.
    pub fn to_batch_op(&self) -> Result<BatchOp, RowError> {
        let name = non_blank(&self.name).ok_or(RowError::MissingName)?;
        match self.action()? {
            RowAction::Delete => Ok(BatchOp::Delete(name.to_string())),
            RowAction::Add => {
                let (month, day, year) = self.date_parts()?;
                Ok(BatchOp::Upsert(BirthdayRecord::new(name, month, day, year)?))
            }
        }
    }

    fn date_parts(&self) -> Result<(u32, u32, Option<i32>), RowError> {
        let split_columns = non_blank(&self.month).is_some() || non_blank(&self.day).is_some();
        if !split_columns {
            if let Some(date) = non_blank(&self.date) {
                return parse_date(date);
            }
        }

        let month = parse_month(non_blank(&self.month).ok_or(RowError::MissingField("month"))?)?;
        let day = parse_number("day", non_blank(&self.day).ok_or(RowError::MissingField("day"))?)?;
        let year = non_blank(&self.year).map(parse_year).transpose()?;
        Ok((month, day, year))
    }
}

/// Parses a combined date cell into `(month, day, year)`.
///
/// A trailing time component (`2024-06-05 00:00:00`) is ignored.
pub fn parse_date(value: &str) -> Result<(u32, u32, Option<i32>), RowError> {
    let invalid = || RowError::InvalidDate(value.trim().to_string());
    let date_part = value.split_whitespace().next().ok_or_else(invalid)?;
    let parts = date_part.split(['-', '/']).collect::<Vec<_>>();
    match parts.as_slice() {
        [year, month, day] if year.len() == 4 => Ok((
            parse_month(month).map_err(|_| invalid())?,
            parse_number("day", day).map_err(|_| invalid())?,
            Some(parse_year(year).map_err(|_| invalid())?),
        )),
        [month, day, year] => Ok((
            parse_month(month).map_err(|_| invalid())?,
            parse_number("day", day).map_err(|_| invalid())?,
            Some(parse_year(year).map_err(|_| invalid())?),
        )),
        [month, day] => Ok((
            parse_month(month).map_err(|_| invalid())?,
            parse_number("day", day).map_err(|_| invalid())?,
            None,
        )),
        _ => Err(invalid()),
    }
}

/// Parses a month given as a number (`6`, `06`) or name (`June`, `jun`).
pub fn parse_month(value: &str) -> Result<u32, RowError> {
    let trimmed = value.trim();
    if trimmed.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return parse_number("month", trimmed);
    }
    trimmed
        .parse::<Month>()
        .map(|month| month.number_from_month())
        .map_err(|_| RowError::UnknownMonth(trimmed.to_string()))
}

// Spreadsheet exports sometimes render integers as `12.0`.
fn parse_number(field: &'static str, value: &str) -> Result<u32, RowError> {
    let trimmed = value.trim();
    let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);
    digits.parse::<u32>().map_err(|_| RowError::InvalidNumber {
        field,
        value: trimmed.to_string(),
    })
}

fn parse_year(value: &str) -> Result<i32, RowError> {
    let year = parse_number("year", value)?;
    i32::try_from(year).map_err(|_| RowError::InvalidNumber {
        field: "year",
        value: value.trim().to_string(),
    })
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
