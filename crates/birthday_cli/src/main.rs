//! Command-line entry point for the weekly birthday notifier.
//!
//! # Responsibility
//! - Wire config, logging, secrets, store and transport for one invocation.
//! - Expose `check` for an external weekly timer and setup-time commands for
//!   loading and editing records.
//!
//! # Invariants
//! - `check` exits 0 whenever the run itself completed, including delivery
//!   failures; only setup failures produce a non-zero exit code.

use anyhow::{anyhow, Context, Result};
use birthday_core::db::{open_db, open_store};
use birthday_core::model::raw_row::parse_month;
use birthday_core::{
    core_version, init_logging, read_spreadsheet_file, AppConfig, BirthdayRecord, BirthdayStore,
    BulkLoader, Clock, CredentialError, DeliveryError, EnvSecretSource, FixedClock,
    MessageTransport, Notifier, RunOutcome, SqliteBirthdayStore, SystemClock, TelegramTransport,
    WeeklyCheck,
};
use chrono::{NaiveDate, NaiveTime};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Weekly birthday digest notifier.
#[derive(Debug, Parser)]
#[command(name = "birthday", version, about)]
struct Cli {
    /// Path to TOML configuration file (falls back to `BIRTHDAY_CONFIG`).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// Send the digest for the week containing a date (today by default).
    Check {
        /// Any day of the week to report, as YYYY-MM-DD.
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Print the digest instead of sending it.
        #[arg(long)]
        dry_run: bool,
    },
    /// Bulk load rows from a .csv export or an .xlsx workbook.
    Load { path: PathBuf },
    /// Insert or update one record.
    Add {
        name: String,
        /// Month number or name (`6`, `Jun`, `June`).
        #[arg(value_parser = month_arg)]
        month: u32,
        day: u32,
        year: Option<i32>,
    },
    /// Delete one record by name.
    Remove { name: String },
    /// Print every stored record.
    List,
    /// Print the version.
    Version,
}

fn month_arg(value: &str) -> Result<u32, String> {
    parse_month(value).map_err(|err| err.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("birthday failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let command = match cli.command {
        None => {
            Cli::command().print_help()?;
            return Ok(());
        }
        Some(Command::Version) => {
            println!("birthday {}", core_version());
            return Ok(());
        }
        Some(command) => command,
    };

    let config = AppConfig::resolve(cli.config.as_deref())?;
    start_logging(&config)?;
    let secrets = EnvSecretSource::new();
    let conn = match &config.database_path {
        Some(path) => open_db(path),
        None => open_store(&secrets),
    }
    .context("failed to open the record store")?;
    let store = SqliteBirthdayStore::try_new(&conn)?;

    match command {
        Command::Check { date, dry_run } => check(&store, &secrets, &config, date, dry_run),
        Command::Load { path } => load(&store, &config, &path),
        Command::Add {
            name,
            month,
            day,
            year,
        } => {
            let record = BirthdayRecord::new(&name, month, day, year)?;
            let id = store.upsert(&record)?;
            println!("saved {} ({:02}-{:02}) id={id}", record.name, month, day);
            Ok(())
        }
        Command::Remove { name } => {
            if store.delete(&name)? {
                println!("removed {name}");
            } else {
                println!("no record named {name}");
            }
            Ok(())
        }
        Command::List => {
            for stored in store.list_all()? {
                let record = stored.record;
                let year = record
                    .year
                    .map(|year| year.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:02}-{:02}\t{}\t{}",
                    record.month, record.day, year, record.name
                );
            }
            Ok(())
        }
        Command::Version => Ok(()),
    }
}

fn start_logging(config: &AppConfig) -> Result<()> {
    let log_dir = config
        .log_dir
        .as_deref()
        .map(|dir| {
            dir.to_str()
                .ok_or_else(|| anyhow!("log_dir `{}` is not valid UTF-8", dir.display()))
        })
        .transpose()?;
    init_logging(&config.log_level, log_dir).map_err(|err| anyhow!(err))
}

fn check(
    store: &SqliteBirthdayStore<'_>,
    secrets: &EnvSecretSource,
    config: &AppConfig,
    date: Option<NaiveDate>,
    dry_run: bool,
) -> Result<()> {
    let transport: Box<dyn MessageTransport> = if dry_run {
        Box::new(NoDelivery)
    } else {
        match TelegramTransport::from_secrets(secrets, &config.telegram) {
            Ok(transport) => Box::new(transport),
            Err(DeliveryError::Credential(err)) => Box::new(MissingCredentials(err)),
            Err(err) => return Err(err.into()),
        }
    };
    let notifier = Notifier::new(transport, config.telegram.parse_mode);
    let clock: Box<dyn Clock> = match date {
        Some(date) => Box::new(FixedClock(date.and_time(NaiveTime::MIN).and_utc())),
        None => Box::new(SystemClock),
    };

    let report = WeeklyCheck::new(store, &notifier)
        .dry_run(dry_run)
        .run(clock.as_ref());

    if dry_run {
        if let Some(message) = &report.message {
            println!("{message}");
        }
    }
    println!(
        "window={} matched={} outcome={}",
        report.window,
        report.matched,
        report.outcome.label()
    );
    if let RunOutcome::DeliveryFailed(reason) | RunOutcome::StoreFailed(reason) = &report.outcome {
        eprintln!("weekly check did not deliver: {reason}");
    }
    Ok(())
}

fn load(store: &SqliteBirthdayStore<'_>, config: &AppConfig, path: &Path) -> Result<()> {
    let rows = read_spreadsheet_file(path)?;

    let result = BulkLoader::new(store)
        .with_policy(config.loader.retry_policy())
        .load(&rows, config.loader.chunk_size);
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            if let Some(partial) = err.partial_report() {
                eprintln!(
                    "partial load: {} chunks committed, {} rows written",
                    partial.batches_written, partial.rows_written
                );
            }
            return Err(anyhow::Error::new(err).context("bulk load did not complete"));
        }
    };

    for rejected in &report.rejected {
        eprintln!("rejected {rejected}");
    }
    println!(
        "rows={} accepted={} rejected={} batches={} upserted={} deleted={} missing={}",
        report.total_rows,
        report.accepted,
        report.rejected_count(),
        report.batches_written,
        report.upserted,
        report.deleted,
        report.missing
    );
    Ok(())
}

/// Dry-run transport; the orchestrator never reaches `Sending` with it.
struct NoDelivery;

impl MessageTransport for NoDelivery {
    fn deliver(&self, _text: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::Transport("dry run does not deliver".to_string()))
    }
}

/// Stands in for Telegram when its secrets are absent, so the run still
/// queries and formats and then reports the delivery failure.
struct MissingCredentials(CredentialError);

impl MessageTransport for MissingCredentials {
    fn deliver(&self, _text: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::Credential(self.0.clone()))
    }
}
