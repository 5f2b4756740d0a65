//! Domain model for birthday records and spreadsheet rows.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Own record validation and name normalization.
//!
//! # Invariants
//! - Every persisted record satisfies `BirthdayRecord::validate()`.
//! - Records are identified by their normalized name (natural key).

pub mod birthday;
pub mod raw_row;
