//! Weekly check orchestrator.
//!
//! # Responsibility
//! - Run one `Idle -> Querying -> Formatting -> Sending -> Idle` cycle per
//!   timer event.
//! - Contain every component failure: report it, log it, return to `Idle`.
//!
//! # Invariants
//! - `run_weekly_check` never returns an error.
//! - Exactly one `event=weekly_check` summary record is logged per run.
//! - No state survives between runs; the window is recomputed every time.

use crate::repo::birthday_repo::BirthdayStore;
use crate::service::notifier::{MessageTransport, NotificationPayload, Notifier};
use crate::window::WeekWindow;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Source of the reference instant.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Querying,
    Formatting,
    Sending,
}

impl Display for RunState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Querying => "querying",
            Self::Formatting => "formatting",
            Self::Sending => "sending",
        };
        f.write_str(name)
    }
}

/// How one run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Delivered,
    /// Digest formatted but not sent.
    DryRun,
    DeliveryFailed(String),
    StoreFailed(String),
    /// Cancelled before entering the given state.
    Cancelled(RunState),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered | Self::DryRun)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::DryRun => "dry_run",
            Self::DeliveryFailed(_) => "delivery_failed",
            Self::StoreFailed(_) => "store_failed",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

/// Result of one weekly run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub window: WeekWindow,
    pub matched: usize,
    pub outcome: RunOutcome,
    /// Formatted digest, when formatting was reached.
    pub message: Option<String>,
    /// States visited, starting and ending with `Idle`.
    pub transitions: Vec<RunState>,
}

struct StateTrack {
    run_id: Uuid,
    state: RunState,
    transitions: Vec<RunState>,
}

impl StateTrack {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: RunState::Idle,
            transitions: vec![RunState::Idle],
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!(
            "event=state_transition module=orchestrator run_id={} from={} to={}",
            self.run_id, self.state, next
        );
        self.state = next;
        self.transitions.push(next);
    }
}

/// Weekly orchestrator with injected collaborators.
pub struct WeeklyCheck<'a, S: BirthdayStore + ?Sized, T: MessageTransport> {
    store: &'a S,
    notifier: &'a Notifier<T>,
    cancel: CancellationToken,
    dry_run: bool,
}

impl<'a, S: BirthdayStore + ?Sized, T: MessageTransport> WeeklyCheck<'a, S, T> {
    pub fn new(store: &'a S, notifier: &'a Notifier<T>) -> Self {
        Self {
            store,
            notifier,
            cancel: CancellationToken::new(),
            dry_run: false,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Formats the digest but skips the `Sending` state.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Runs one check using `clock` as the reference instant source.
    pub fn run(&self, clock: &dyn Clock) -> RunReport {
        self.run_weekly_check(clock.now())
    }

    /// Runs one check for the week containing `now`.
    pub fn run_weekly_check(&self, now: DateTime<Utc>) -> RunReport {
        let started_at = Instant::now();
        let run_id = Uuid::new_v4();
        let window = WeekWindow::containing(now);
        let mut track = StateTrack::new(run_id);
        let mut matched = 0;
        let mut message = None;

        let outcome = self.drive(&mut track, &window, &mut matched, &mut message);
        if track.state != RunState::Idle {
            track.advance(RunState::Idle);
        }

        let report = RunReport {
            run_id,
            window,
            matched,
            outcome,
            message,
            transitions: track.transitions,
        };
        log_run(&report, started_at);
        report
    }

    fn drive(
        &self,
        track: &mut StateTrack,
        window: &WeekWindow,
        matched: &mut usize,
        message: &mut Option<String>,
    ) -> RunOutcome {
        if let Some(cancelled) = self.cancelled_before(RunState::Querying) {
            return cancelled;
        }
        track.advance(RunState::Querying);
        let records = match self.store.query_by_window(window) {
            Ok(records) => records,
            Err(err) => return RunOutcome::StoreFailed(err.to_string()),
        };
        *matched = records.len();

        if let Some(cancelled) = self.cancelled_before(RunState::Formatting) {
            return cancelled;
        }
        track.advance(RunState::Formatting);
        let payload = NotificationPayload::new(*window, records);
        let text = self.notifier.format(&payload);
        *message = Some(text.clone());

        if self.dry_run {
            return RunOutcome::DryRun;
        }
        if let Some(cancelled) = self.cancelled_before(RunState::Sending) {
            return cancelled;
        }
        track.advance(RunState::Sending);
        match self.notifier.send(&text) {
            Ok(()) => RunOutcome::Delivered,
            Err(err) => RunOutcome::DeliveryFailed(err.to_string()),
        }
    }

    fn cancelled_before(&self, next: RunState) -> Option<RunOutcome> {
        if self.cancel.is_cancelled() {
            Some(RunOutcome::Cancelled(next))
        } else {
            None
        }
    }
}

fn log_run(report: &RunReport, started_at: Instant) {
    let duration_ms = started_at.elapsed().as_millis();
    match &report.outcome {
        RunOutcome::Delivered | RunOutcome::DryRun => info!(
            "event=weekly_check module=orchestrator status=ok run_id={} window={} matched={} outcome={} duration_ms={}",
            report.run_id,
            report.window,
            report.matched,
            report.outcome.label(),
            duration_ms
        ),
        RunOutcome::Cancelled(state) => warn!(
            "event=weekly_check module=orchestrator status=cancelled run_id={} window={} matched={} outcome={} before_state={} duration_ms={}",
            report.run_id,
            report.window,
            report.matched,
            report.outcome.label(),
            state,
            duration_ms
        ),
        RunOutcome::DeliveryFailed(reason) | RunOutcome::StoreFailed(reason) => error!(
            "event=weekly_check module=orchestrator status=error run_id={} window={} matched={} outcome={} duration_ms={} error={}",
            report.run_id,
            report.window,
            report.matched,
            report.outcome.label(),
            duration_ms,
            reason
        ),
    }
}
