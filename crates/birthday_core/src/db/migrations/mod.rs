//! Schema migrations for the birthday store.
//!
//! # Invariants
//! - Steps are listed in strictly increasing `version` order.
//! - All pending steps run in one transaction; `PRAGMA user_version` tracks
//!   the last applied step.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::{Connection, Transaction};

#[derive(Debug, Clone, Copy)]
struct MigrationStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[MigrationStep] = &[MigrationStep {
    version: 1,
    name: "birthdays",
    sql: include_str!("0001_init.sql"),
}];

/// Schema version this binary writes.
pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |step| step.version)
}

/// Reads the schema version recorded in the database.
pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?)
}

/// Brings `conn` up to `latest_version()`.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the file was written by a newer binary.
/// - SQLite errors from any step; the whole upgrade is rolled back.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let from_version = current_user_version(conn)?;
    let to_version = latest_version();
    if from_version > to_version {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from_version,
            latest_supported: to_version,
        });
    }

    let pending = STEPS
        .iter()
        .filter(|step| step.version > from_version)
        .collect::<Vec<_>>();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for step in pending {
        run_step(&tx, step)?;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={}",
        from_version, to_version
    );
    Ok(())
}

fn run_step(tx: &Transaction<'_>, step: &MigrationStep) -> DbResult<()> {
    debug!(
        "event=db_migrate_step module=db status=start version={} name={}",
        step.version, step.name
    );
    tx.execute_batch(step.sql)?;
    tx.pragma_update(None, "user_version", step.version)?;
    Ok(())
}
