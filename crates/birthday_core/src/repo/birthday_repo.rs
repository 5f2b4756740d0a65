//! Birthday store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide upsert/delete/window-query APIs over the `birthdays` table.
//! - Classify SQLite failures into store-unavailable vs. data errors.
//!
//! # Invariants
//! - Write paths call `BirthdayRecord::validate()` before SQL mutations.
//! - Upserts are idempotent on the natural key (`name_key`).
//! - `apply_batch` writes one chunk in a single transaction.
//! - Window queries return records ordered by occurrence date, then name.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::birthday::{
    natural_key, BirthdayId, BirthdayRecord, BirthdayValidationError, StoredBirthday,
};
use crate::service::bulk_loader::{BulkLoader, LoadError, LoadReport};
use crate::window::WeekWindow;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use thiserror::Error;

const BIRTHDAY_SELECT_SQL: &str = "SELECT id, name, month, day, year FROM birthdays";

const UPSERT_SQL: &str = "INSERT INTO birthdays (name, name_key, month, day, year)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT(name_key) DO UPDATE SET
        name = excluded.name,
        month = excluded.month,
        day = excluded.day,
        year = excluded.year,
        updated_at = (strftime('%s', 'now') * 1000)
     RETURNING id;";

pub type RepoResult<T> = Result<T, RepoError>;

/// Store error for birthday persistence and query operations.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Validation(#[from] BirthdayValidationError),
    /// Connectivity loss: cannot open, busy/locked beyond timeout, I/O.
    #[error("record store unavailable: {message}")]
    StoreUnavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
    #[error("conflicting birthday record: {0}")]
    Conflict(String),
    #[error(transparent)]
    Db(DbError),
    #[error("invalid persisted birthday data: {0}")]
    InvalidData(String),
}

impl RepoError {
    /// Connectivity loss reported by any store adapter.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Connectivity loss caused by an underlying adapter error.
    pub fn unavailable_from<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::StoreUnavailable {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns whether the failure is transient connectivity loss.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase,
            ) => Self::unavailable_from(value),
            Some(ErrorCode::ConstraintViolation) => Self::Conflict(value.to_string()),
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => err.into(),
            other => Self::Db(other),
        }
    }
}

/// One write inside a chunked batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Upsert(BirthdayRecord),
    /// Delete by raw or normalized name.
    Delete(String),
}

/// Counters returned by one `apply_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub upserted: usize,
    pub deleted: usize,
    /// Deletes whose name was not present.
    pub missing: usize,
}

/// Record store adapter interface.
pub trait BirthdayStore {
    /// Inserts or updates one record by natural key and returns its id.
    fn upsert(&self, record: &BirthdayRecord) -> RepoResult<BirthdayId>;
    /// Writes one chunk of operations as a single store request.
    fn apply_batch(&self, ops: &[BatchOp]) -> RepoResult<BatchOutcome>;
    /// Returns records observed inside `window`, ordered by occurrence date.
    fn query_by_window(&self, window: &WeekWindow) -> RepoResult<Vec<BirthdayRecord>>;
    fn get_by_name(&self, name: &str) -> RepoResult<Option<StoredBirthday>>;
    /// Deletes by natural key. Returns `false` when nothing matched.
    fn delete(&self, name: &str) -> RepoResult<bool>;
    /// Lists all records ordered by month, day, name.
    fn list_all(&self) -> RepoResult<Vec<StoredBirthday>>;
    fn count(&self) -> RepoResult<u64>;

    /// Upserts `records` in chunks of `batch_size` using the bulk loader policy.
    fn batch_upsert(
        &self,
        records: &[BirthdayRecord],
        batch_size: usize,
    ) -> Result<LoadReport, LoadError> {
        BulkLoader::new(self).upsert_records(records, batch_size)
    }
}

/// SQLite-backed birthday store.
pub struct SqliteBirthdayStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteBirthdayStore<'conn> {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_birthday_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl BirthdayStore for SqliteBirthdayStore<'_> {
    fn upsert(&self, record: &BirthdayRecord) -> RepoResult<BirthdayId> {
        record.validate()?;
        upsert_on(self.conn, record)
    }

    fn apply_batch(&self, ops: &[BatchOp]) -> RepoResult<BatchOutcome> {
        for op in ops {
            if let BatchOp::Upsert(record) = op {
                record.validate()?;
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut outcome = BatchOutcome::default();
        for op in ops {
            match op {
                BatchOp::Upsert(record) => {
                    upsert_on(&tx, record)?;
                    outcome.upserted += 1;
                }
                BatchOp::Delete(name) => {
                    if delete_on(&tx, name)? {
                        outcome.deleted += 1;
                    } else {
                        outcome.missing += 1;
                    }
                }
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    fn query_by_window(&self, window: &WeekWindow) -> RepoResult<Vec<BirthdayRecord>> {
        let keys = window.month_day_keys();
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!("{BIRTHDAY_SELECT_SQL} WHERE (month * 100 + day) IN ({placeholders})");
        let bind_values = keys
            .iter()
            .map(|(month, day)| Value::Integer(i64::from(month * 100 + day)))
            .collect::<Vec<_>>();

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut matched = Vec::new();
        while let Some(row) = rows.next()? {
            let stored = parse_birthday_row(row)?;
            if let Some(date) = window.occurrence_of(&stored.record) {
                matched.push((date, stored.record));
            }
        }

        matched.sort_by(|(left_date, left), (right_date, right)| {
            left_date
                .cmp(right_date)
                .then_with(|| left.name.cmp(&right.name))
        });
        Ok(matched.into_iter().map(|(_, record)| record).collect())
    }

    fn get_by_name(&self, name: &str) -> RepoResult<Option<StoredBirthday>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{BIRTHDAY_SELECT_SQL} WHERE name_key = ?1;"))?;
        let mut rows = stmt.query([natural_key(name)])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_birthday_row(row)?));
        }
        Ok(None)
    }

    fn delete(&self, name: &str) -> RepoResult<bool> {
        delete_on(self.conn, name)
    }

    fn list_all(&self) -> RepoResult<Vec<StoredBirthday>> {
        let mut stmt = self.conn.prepare(&format!(
            "{BIRTHDAY_SELECT_SQL} ORDER BY month ASC, day ASC, name ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_birthday_row(row)?);
        }
        Ok(items)
    }

    fn count(&self) -> RepoResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM birthdays;", [], |row| row.get(0))?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative row count `{count}`")))
    }
}

fn upsert_on(conn: &Connection, record: &BirthdayRecord) -> RepoResult<BirthdayId> {
    let id = conn.query_row(
        UPSERT_SQL,
        params![
            record.name.as_str(),
            record.natural_key(),
            record.month,
            record.day,
            record.year,
        ],
        |row| row.get::<_, BirthdayId>(0),
    )?;
    Ok(id)
}

fn delete_on(conn: &Connection, name: &str) -> RepoResult<bool> {
    let changed = conn.execute(
        "DELETE FROM birthdays WHERE name_key = ?1;",
        [natural_key(name)],
    )?;
    Ok(changed > 0)
}

fn parse_birthday_row(row: &Row<'_>) -> RepoResult<StoredBirthday> {
    let record = BirthdayRecord {
        name: row.get("name")?,
        month: row.get("month")?,
        day: row.get("day")?,
        year: row.get("year")?,
    };
    record.validate().map_err(|err| {
        RepoError::InvalidData(format!("birthday `{}` failed validation: {err}", record.name))
    })?;
    Ok(StoredBirthday {
        id: row.get("id")?,
        record,
    })
}

fn ensure_birthday_connection_ready(conn: &Connection) -> RepoResult<()> {
    let version = current_user_version(conn)?;
    if version < latest_version() {
        return Err(DbError::SchemaNotReady(format!(
            "schema version {version} is older than required {}",
            latest_version()
        ))
        .into());
    }

    let exists = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'birthdays';",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(DbError::SchemaNotReady("missing `birthdays` table".to_string()).into());
    }
    Ok(())
}
