//! Spreadsheet readers producing raw rows.
//!
//! # Responsibility
//! - Read CSV exports and Excel workbooks (first worksheet).
//! - Map spreadsheet headers to `RawRow` fields case-insensitively.
//! - Leave value validation to the bulk loader so bad rows are collected,
//!   not fatal.
//!
//! # Invariants
//! - Row numbers match spreadsheet rows: the header is row 1.
//! - Fully blank rows are skipped.
//! - A file without a `name` column, or without `month`+`day` or `date`,
//!   is rejected as a whole.
//! - Excel date cells reach the loader as `YYYY-MM-DD` text.

use crate::model::raw_row::RawRow;
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate};
use csv::{ReaderBuilder, Trim};
use log::info;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to open `{path}`: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("failed to read workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("workbook `{0}` has no worksheets")]
    NoWorksheet(PathBuf),
    #[error("unsupported spreadsheet format `{0}` (expected .csv or .xlsx)")]
    UnsupportedFormat(PathBuf),
    #[error("missing required column `{0}`")]
    MissingColumn(&'static str),
}

#[derive(Debug, Default)]
struct ColumnMap {
    name: Option<usize>,
    month: Option<usize>,
    day: Option<usize>,
    year: Option<usize>,
    date: Option<usize>,
    action: Option<usize>,
}

impl ColumnMap {
    fn from_headers<'a>(headers: impl IntoIterator<Item = &'a str>) -> Result<Self, ImportError> {
        let mut map = Self::default();
        for (index, header) in headers.into_iter().enumerate() {
            let slot = match header.trim().to_ascii_lowercase().as_str() {
                "name" => &mut map.name,
                "month" => &mut map.month,
                "day" => &mut map.day,
                "year" => &mut map.year,
                "date" | "birthday" => &mut map.date,
                "update" | "action" => &mut map.action,
                _ => continue,
            };
            slot.get_or_insert(index);
        }

        if map.name.is_none() {
            return Err(ImportError::MissingColumn("name"));
        }
        let has_split_date = map.month.is_some() && map.day.is_some();
        if !has_split_date && map.date.is_none() {
            return Err(ImportError::MissingColumn("month/day or date"));
        }
        Ok(map)
    }

    /// Builds a row from cell texts; `None` when every cell is blank.
    fn row(&self, row: usize, cells: &[Option<String>]) -> Option<RawRow> {
        if cells.iter().all(Option::is_none) {
            return None;
        }
        let cell = |index: Option<usize>| index.and_then(|index| cells.get(index).cloned().flatten());
        Some(RawRow {
            row,
            name: cell(self.name),
            month: cell(self.month),
            day: cell(self.day),
            year: cell(self.year),
            date: cell(self.date),
            action: cell(self.action),
        })
    }
}

/// Reads raw rows from a CSV export or Excel workbook, chosen by extension.
pub fn read_spreadsheet_file(path: impl AsRef<Path>) -> Result<Vec<RawRow>, ImportError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("csv") => read_csv_file(path),
        Some(ext) if WORKBOOK_EXTENSIONS.contains(&ext) => read_xlsx_file(path),
        _ => Err(ImportError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Reads raw rows from a CSV file.
pub fn read_csv_file(path: impl AsRef<Path>) -> Result<Vec<RawRow>, ImportError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ImportError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let rows = read_csv(BufReader::new(file))?;
    info!(
        "event=spreadsheet_import module=import status=ok format=csv rows={} path={}",
        rows.len(),
        path.display()
    );
    Ok(rows)
}

/// Reads raw rows from any CSV source with a header line.
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<RawRow>, ImportError> {
    let mut csv_reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);
    let columns = ColumnMap::from_headers(csv_reader.headers()?.iter())?;

    let mut rows = Vec::new();
    for (index, result) in csv_reader.records().enumerate() {
        let record = result?;
        let cells = record
            .iter()
            .map(|value| (!value.is_empty()).then(|| value.to_string()))
            .collect::<Vec<_>>();
        rows.extend(columns.row(index + 2, &cells));
    }
    Ok(rows)
}

/// Reads raw rows from the first worksheet of an Excel workbook.
///
/// Date-formatted cells become `YYYY-MM-DD` text; whole-number cells lose
/// their `.0` suffix.
pub fn read_xlsx_file(path: impl AsRef<Path>) -> Result<Vec<RawRow>, ImportError> {
    let path = path.as_ref();
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ImportError::NoWorksheet(path.to_path_buf()))??;

    let first_row = range.start().map_or(0, |(row, _)| row as usize);
    let mut sheet_rows = range.rows();
    let headers = sheet_rows
        .next()
        .map(|header| header.iter().map(cell_text).collect::<Vec<_>>())
        .unwrap_or_default();
    let columns = ColumnMap::from_headers(headers.iter().map(|h| h.as_deref().unwrap_or("")))?;

    let mut rows = Vec::new();
    for (index, sheet_row) in sheet_rows.enumerate() {
        let cells = sheet_row.iter().map(cell_text).collect::<Vec<_>>();
        // Header sits on spreadsheet row `first_row + 1`.
        rows.extend(columns.row(first_row + index + 2, &cells));
    }
    info!(
        "event=spreadsheet_import module=import status=ok format=workbook rows={} path={}",
        rows.len(),
        path.display()
    );
    Ok(rows)
}

fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(value) => value.trim().to_string(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) if value.fract() == 0.0 => format!("{value:.0}"),
        Data::Float(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        Data::DateTime(value) if value.is_datetime() => excel_serial_date(value.as_f64())?
            .format("%Y-%m-%d")
            .to_string(),
        Data::DateTime(value) => value.as_f64().to_string(),
        Data::DateTimeIso(value) => value.get(..10).unwrap_or(value).to_string(),
        Data::DurationIso(value) => value.clone(),
    };
    (!text.is_empty()).then_some(text)
}

/// Converts a 1900-system Excel serial to a calendar date.
///
/// Serial 60 is Excel's phantom 1900-02-29; earlier serials count from
/// 1899-12-31, later ones from 1899-12-30.
fn excel_serial_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let days = serial.trunc() as i64;
    let epoch = if days < 61 {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };
    epoch.checked_add_signed(Duration::days(days))
}
