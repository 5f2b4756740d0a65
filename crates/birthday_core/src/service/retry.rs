//! Bounded retry policy for quota-metered store writes.
//!
//! # Invariants
//! - An operation runs at least once and at most `max_attempts` times.
//! - The delay before retry `n` (1-based) is `backoff * 2^(n-1)`, capped at
//!   `MAX_BACKOFF`.

use log::warn;
use std::fmt::Display;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Per-chunk retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// Last error after all attempts were spent.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no retries.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Runs `op` until it succeeds or attempts are exhausted.
    ///
    /// `op` receives the 1-based attempt number. `label` only feeds logs.
    pub fn run<T, E, F>(&self, label: &str, mut op: F) -> Result<T, Exhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= max_attempts => {
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                Err(err) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "event=retry module=service status=error target={} attempt={} max_attempts={} delay_ms={} error={}",
                        label,
                        attempt,
                        max_attempts,
                        delay.as_millis(),
                        err
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RetryPolicy;
    use std::time::Duration;

    #[test]
    fn delay_doubles_per_attempt_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(40), Duration::from_secs(30));
    }

    #[test]
    fn run_retries_until_success() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let mut calls = 0;
        let value = policy
            .run("test", |attempt| {
                calls += 1;
                if attempt < 3 {
                    Err("flaky")
                } else {
                    Ok(attempt)
                }
            })
            .expect("third attempt succeeds");
        assert_eq!(value, 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn run_reports_exhaustion() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let err = policy
            .run::<(), _, _>("test", |_| Err("down"))
            .expect_err("always failing op must exhaust");
        assert_eq!(err.attempts, 2);
        assert_eq!(err.last_error, "down");
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            backoff: Duration::ZERO,
        };
        let mut calls = 0;
        let _ = policy.run::<(), _, _>("test", |_| {
            calls += 1;
            Err("x")
        });
        assert_eq!(calls, 1);
    }
}
