//! Chunked, quota-aware bulk loading of spreadsheet rows.
//!
//! # Responsibility
//! - Validate raw rows, collecting rejections without aborting the load.
//! - Write accepted rows through `BirthdayStore::apply_batch` in chunks of at
//!   most `chunk_size`, retrying each chunk with a bounded `RetryPolicy`.
//!
//! # Invariants
//! - `M` accepted rows and chunk size `N` yield `ceil(M/N)` chunks.
//! - Chunks committed before a failure or cancellation stay committed.
//! - Upserts are idempotent on natural key, so reloading the same rows does
//!   not create duplicates.
//! - Concurrent chunks never touch the same natural key; loads that repeat a
//!   key are written sequentially in source order.

use crate::model::birthday::{natural_key, BirthdayRecord};
use crate::model::raw_row::{RawRow, RejectedRow, RowError};
use crate::repo::birthday_repo::{BatchOp, BatchOutcome, BirthdayStore, RepoError};
use crate::service::retry::{Exhausted, RetryPolicy};
use crossbeam_channel::unbounded;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CHUNK_SIZE: usize = 50;
pub const DEFAULT_WORKERS: usize = 1;

/// Summary of one load run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows offered to the loader.
    pub total_rows: usize,
    /// Rows that passed validation.
    pub accepted: usize,
    /// Rows rejected by validation, in source order.
    pub rejected: Vec<RejectedRow>,
    /// Chunks committed by the store.
    pub batches_written: usize,
    /// `apply_batch` calls issued, including retries.
    pub batch_attempts: usize,
    /// Accepted rows inside committed chunks.
    pub rows_written: usize,
    pub upserted: usize,
    pub deleted: usize,
    /// Deletes that named an unknown record.
    pub missing: usize,
}

impl LoadReport {
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }

    fn absorb(&mut self, rows: usize, outcome: BatchOutcome) {
        self.batches_written += 1;
        self.rows_written += rows;
        self.upserted += outcome.upserted;
        self.deleted += outcome.deleted;
        self.missing += outcome.missing;
    }
}

/// Load failures surfaced to the caller.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("chunk size must be a positive integer")]
    InvalidChunkSize,
    /// A chunk exhausted its retries. Earlier chunks remain committed.
    #[error("chunk covering rows {first_row}-{last_row} failed after {attempts} attempts: {source}")]
    ChunkFailed {
        first_row: usize,
        last_row: usize,
        attempts: u32,
        #[source]
        source: RepoError,
        report: Box<LoadReport>,
    },
    /// The caller cancelled the load. Committed chunks remain committed.
    #[error("load cancelled after {} committed chunks", .report.batches_written)]
    Cancelled { report: Box<LoadReport> },
}

impl LoadError {
    /// Partial-load report for failures that happened mid-load.
    pub fn partial_report(&self) -> Option<&LoadReport> {
        match self {
            Self::InvalidChunkSize => None,
            Self::ChunkFailed { report, .. } | Self::Cancelled { report } => Some(report),
        }
    }
}

// Accepted rows split into parallel vectors so chunks borrow without cloning.
struct PreparedRows {
    rows: Vec<usize>,
    ops: Vec<BatchOp>,
}

struct ChunkWrite {
    outcome: BatchOutcome,
    attempts: u32,
}

struct ChunkFailure {
    attempts: u32,
    error: RepoError,
}

/// Bulk loader writing through a birthday store.
pub struct BulkLoader<'a, S: BirthdayStore + ?Sized> {
    store: &'a S,
    policy: RetryPolicy,
    workers: usize,
    cancel: CancellationToken,
}

impl<'a, S: BirthdayStore + ?Sized> BulkLoader<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
            workers: DEFAULT_WORKERS,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Worker count used by `load_concurrent`. Values below 1 become 1.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Validates and writes `rows` sequentially in chunks of `chunk_size`.
    ///
    /// # Errors
    /// - `InvalidChunkSize` when `chunk_size == 0`.
    /// - `ChunkFailed` when a chunk exhausts the retry policy.
    /// - `Cancelled` when the cancellation token fires between chunks.
    pub fn load(&self, rows: &[RawRow], chunk_size: usize) -> Result<LoadReport, LoadError> {
        let (prepared, report) = prepare_rows(rows);
        self.write_sequential(prepared, report, chunk_size)
    }

    /// Writes already-built records, skipping invalid ones as rejected rows.
    ///
    /// Row numbers in the report are 1-based positions in `records`.
    pub fn upsert_records(
        &self,
        records: &[BirthdayRecord],
        chunk_size: usize,
    ) -> Result<LoadReport, LoadError> {
        let mut report = LoadReport {
            total_rows: records.len(),
            ..LoadReport::default()
        };
        let mut prepared = PreparedRows {
            rows: Vec::with_capacity(records.len()),
            ops: Vec::with_capacity(records.len()),
        };
        for (index, record) in records.iter().enumerate() {
            match record.validate() {
                Ok(()) => {
                    prepared.rows.push(index + 1);
                    prepared.ops.push(BatchOp::Upsert(record.clone()));
                }
                Err(err) => report.rejected.push(RejectedRow {
                    row: index + 1,
                    reason: RowError::Invalid(err),
                }),
            }
        }
        report.accepted = prepared.ops.len();
        self.write_sequential(prepared, report, chunk_size)
    }

    fn write_sequential(
        &self,
        prepared: PreparedRows,
        mut report: LoadReport,
        chunk_size: usize,
    ) -> Result<LoadReport, LoadError> {
        if chunk_size == 0 {
            return Err(LoadError::InvalidChunkSize);
        }

        let started_at = Instant::now();
        let chunk_count = prepared.ops.len().div_ceil(chunk_size);
        info!(
            "event=bulk_load module=service status=start rows={} accepted={} rejected={} chunks={} chunk_size={} workers=1",
            report.total_rows,
            report.accepted,
            report.rejected.len(),
            chunk_count,
            chunk_size
        );

        for (index, (ops, rows)) in prepared
            .ops
            .chunks(chunk_size)
            .zip(prepared.rows.chunks(chunk_size))
            .enumerate()
        {
            if self.cancel.is_cancelled() {
                warn!(
                    "event=bulk_load module=service status=cancelled committed_chunks={} remaining_chunks={}",
                    report.batches_written,
                    chunk_count - index
                );
                return Err(LoadError::Cancelled {
                    report: Box::new(report),
                });
            }

            match self.write_chunk(index, ops, rows) {
                Ok(written) => {
                    report.batch_attempts += written.attempts as usize;
                    report.absorb(ops.len(), written.outcome);
                }
                Err(failure) => {
                    report.batch_attempts += failure.attempts as usize;
                    return Err(chunk_failed(rows, failure, report));
                }
            }
        }

        log_finished(&report, started_at);
        Ok(report)
    }

    fn write_chunk(
        &self,
        index: usize,
        ops: &[BatchOp],
        rows: &[usize],
    ) -> Result<ChunkWrite, ChunkFailure> {
        let (first_row, last_row) = row_range(rows);
        let label = format!("chunk:{index}:rows:{first_row}-{last_row}");
        let mut attempts = 0;
        let result = self.policy.run(&label, |attempt| {
            attempts = attempt;
            self.store.apply_batch(ops)
        });
        match result {
            Ok(outcome) => {
                debug!(
                    "event=bulk_chunk module=service status=ok chunk={} rows={}-{} attempts={} upserted={} deleted={}",
                    index, first_row, last_row, attempts, outcome.upserted, outcome.deleted
                );
                Ok(ChunkWrite { outcome, attempts })
            }
            Err(Exhausted {
                attempts,
                last_error,
            }) => {
                error!(
                    "event=bulk_chunk module=service status=error chunk={} rows={}-{} attempts={} error={}",
                    index, first_row, last_row, attempts, last_error
                );
                Err(ChunkFailure {
                    attempts,
                    error: last_error,
                })
            }
        }
    }
}

impl<S: BirthdayStore + Sync + ?Sized> BulkLoader<'_, S> {
    /// Like `load`, but issues chunk writes from up to `workers` threads.
    ///
    /// Chunk completion order is unspecified. After the first exhausted chunk
    /// no further chunks are dispatched; chunks already in flight finish.
    /// Rows that name the same person more than once (an add followed by a
    /// delete, or two adds) make the whole load sequential.
    pub fn load_concurrent(
        &self,
        rows: &[RawRow],
        chunk_size: usize,
    ) -> Result<LoadReport, LoadError> {
        let (prepared, mut report) = prepare_rows(rows);
        if chunk_size == 0 {
            return Err(LoadError::InvalidChunkSize);
        }
        if self.workers <= 1 {
            return self.write_sequential(prepared, report, chunk_size);
        }
        if let Some(key) = first_repeated_key(&prepared.ops) {
            info!(
                "event=bulk_load module=service status=sequential reason=repeated_key workers={} key_chars={}",
                self.workers,
                key.chars().count()
            );
            return self.write_sequential(prepared, report, chunk_size);
        }

        let started_at = Instant::now();
        let op_chunks = prepared.ops.chunks(chunk_size).collect::<Vec<_>>();
        let row_chunks = prepared.rows.chunks(chunk_size).collect::<Vec<_>>();
        let workers = self.workers.min(op_chunks.len()).max(1);
        info!(
            "event=bulk_load module=service status=start rows={} accepted={} rejected={} chunks={} chunk_size={} workers={}",
            report.total_rows,
            report.accepted,
            report.rejected.len(),
            op_chunks.len(),
            chunk_size,
            workers
        );

        let halt = self.cancel.child_token();
        let (job_tx, job_rx) = unbounded::<usize>();
        let (result_tx, result_rx) = unbounded::<(usize, Result<ChunkWrite, ChunkFailure>)>();
        for index in 0..op_chunks.len() {
            // Receivers outlive this loop, so sending cannot fail.
            let _ = job_tx.send(index);
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let halt = halt.clone();
                let op_chunks = &op_chunks;
                let row_chunks = &row_chunks;
                scope.spawn(move || {
                    for index in job_rx.iter() {
                        if halt.is_cancelled() {
                            break;
                        }
                        let result = self.write_chunk(index, op_chunks[index], row_chunks[index]);
                        if result.is_err() {
                            halt.cancel();
                        }
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut first_failure: Option<(usize, ChunkFailure)> = None;
        for (index, result) in result_rx.iter() {
            match result {
                Ok(written) => {
                    report.batch_attempts += written.attempts as usize;
                    report.absorb(op_chunks[index].len(), written.outcome);
                }
                Err(failure) => {
                    report.batch_attempts += failure.attempts as usize;
                    let replace = first_failure
                        .as_ref()
                        .map_or(true, |(current, _)| index < *current);
                    if replace {
                        first_failure = Some((index, failure));
                    }
                }
            }
        }

        if let Some((index, failure)) = first_failure {
            return Err(chunk_failed(row_chunks[index], failure, report));
        }
        if report.batches_written < op_chunks.len() {
            warn!(
                "event=bulk_load module=service status=cancelled committed_chunks={} remaining_chunks={}",
                report.batches_written,
                op_chunks.len() - report.batches_written
            );
            return Err(LoadError::Cancelled {
                report: Box::new(report),
            });
        }

        log_finished(&report, started_at);
        Ok(report)
    }
}

fn prepare_rows(rows: &[RawRow]) -> (PreparedRows, LoadReport) {
    let mut report = LoadReport {
        total_rows: rows.len(),
        ..LoadReport::default()
    };
    let mut prepared = PreparedRows {
        rows: Vec::with_capacity(rows.len()),
        ops: Vec::with_capacity(rows.len()),
    };
    for raw in rows {
        match raw.to_batch_op() {
            Ok(op) => {
                prepared.rows.push(raw.row);
                prepared.ops.push(op);
            }
            Err(reason) => {
                debug!(
                    "event=row_rejected module=service row={} reason={}",
                    raw.row, reason
                );
                report.rejected.push(RejectedRow {
                    row: raw.row,
                    reason,
                });
            }
        }
    }
    report.accepted = prepared.ops.len();
    (prepared, report)
}

fn first_repeated_key(ops: &[BatchOp]) -> Option<String> {
    let mut seen = HashSet::with_capacity(ops.len());
    ops.iter()
        .map(|op| match op {
            BatchOp::Upsert(record) => natural_key(&record.name),
            BatchOp::Delete(name) => natural_key(name),
        })
        .find(|key| !seen.insert(key.clone()))
}

fn chunk_failed(rows: &[usize], failure: ChunkFailure, report: LoadReport) -> LoadError {
    let (first_row, last_row) = row_range(rows);
    LoadError::ChunkFailed {
        first_row,
        last_row,
        attempts: failure.attempts,
        source: failure.error,
        report: Box::new(report),
    }
}

fn row_range(rows: &[usize]) -> (usize, usize) {
    let first = rows.iter().copied().min().unwrap_or(0);
    let last = rows.iter().copied().max().unwrap_or(0);
    (first, last)
}

fn log_finished(report: &LoadReport, started_at: Instant) {
    info!(
        "event=bulk_load module=service status=ok accepted={} rejected={} batches={} attempts={} upserted={} deleted={} missing={} duration_ms={}",
        report.accepted,
        report.rejected.len(),
        report.batches_written,
        report.batch_attempts,
        report.upserted,
        report.deleted,
        report.missing,
        started_at.elapsed().as_millis()
    );
}
