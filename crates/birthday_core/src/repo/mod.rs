//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the record store contract used by loader and weekly check.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository writes enforce `BirthdayRecord::validate()` before persistence.
//! - Connectivity loss surfaces as `RepoError::StoreUnavailable`.

pub mod birthday_repo;
