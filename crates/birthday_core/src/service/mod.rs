//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate store calls into load, format, notify and weekly-check flows.
//! - Keep the CLI decoupled from storage and transport details.

pub mod bulk_loader;
pub mod notifier;
pub mod retry;
pub mod weekly_check;
