//! Core domain logic for the weekly birthday notifier.
//! This crate is the single source of truth for record and window invariants.

pub mod config;
pub mod credential;
pub mod db;
pub mod import;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod window;

pub use config::{AppConfig, ConfigError, LoaderConfig, ParseMode, TelegramConfig};
pub use credential::{
    CredentialError, EnvSecretSource, Secret, SecretSource, StaticSecretSource,
};
pub use import::{read_csv, read_csv_file, read_spreadsheet_file, read_xlsx_file, ImportError};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::birthday::{BirthdayId, BirthdayRecord, BirthdayValidationError, StoredBirthday};
pub use model::raw_row::{RawRow, RejectedRow, RowAction, RowError};
pub use repo::birthday_repo::{
    BatchOp, BatchOutcome, BirthdayStore, RepoError, RepoResult, SqliteBirthdayStore,
};
pub use service::bulk_loader::{BulkLoader, LoadError, LoadReport};
pub use service::notifier::{
    format_digest, DeliveryError, MessageTransport, NotificationPayload, Notifier,
    TelegramTransport,
};
pub use service::retry::RetryPolicy;
pub use service::weekly_check::{
    Clock, FixedClock, RunOutcome, RunReport, RunState, SystemClock, WeeklyCheck,
};
pub use window::{WeekWindow, WindowError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
