//! Retry With Deadlines
//!
//! Each attempt runs against a [`Deadline`]. Work checks the deadline at its
//! own suspension points; a result produced after the deadline is discarded
//! as a timeout. Attempts back off linearly: `attempt * backoff_step`.

use std::cell::Cell;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_secs(1);

/// Monotonic time source measured from an arbitrary origin.
pub trait Clock {
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual time; `sleep` advances instantly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Operation timed out after {timeout:?}")]
pub struct OperationTimeout {
    pub timeout: Duration,
}

pub struct Deadline<'c> {
    clock: &'c dyn Clock,
    started: Duration,
    timeout: Duration,
}

impl<'c> Deadline<'c> {
    pub fn start(clock: &'c dyn Clock, timeout: Duration) -> Self {
        Self { clock, started: clock.now(), timeout }
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.started)
    }

    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() > self.timeout
    }

    pub fn check(&self) -> Result<(), OperationTimeout> {
        if self.is_expired() {
            Err(OperationTimeout { timeout: self.timeout })
        } else {
            Ok(())
        }
    }
}

/// Errors that know whether another attempt could help.
pub trait Retryable: From<OperationTimeout> {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }

    /// Runs `op` until it succeeds, fails terminally, or attempts run out.
    /// The last error is returned when every attempt fails.
    pub fn run<T, E, F>(&self, clock: &dyn Clock, label: &str, mut op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32, &Deadline<'_>) -> Result<T, E>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let deadline = Deadline::start(clock, self.attempt_timeout);
            let outcome = op(attempt, &deadline).and_then(|value| {
                deadline.check()?;
                Ok(value)
            });

            match outcome {
                Ok(value) => {
                    debug!(operation = label, attempt, "Attempt succeeded");
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    warn!(operation = label, attempt, error = %e, "Giving up after final attempt");
                    return Err(e);
                }
                Err(e) => {
                    let backoff = self.backoff_for(attempt);
                    warn!(operation = label, attempt, error = %e, ?backoff, "Attempt failed, retrying");
                    clock.sleep(backoff);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky,
        Fatal,
        Timeout,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl From<OperationTimeout> for TestError {
        fn from(_: OperationTimeout) -> Self {
            TestError::Timeout
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            !matches!(self, TestError::Fatal)
        }
    }

    #[test]
    fn test_linear_backoff_between_attempts() {
        let clock = ManualClock::new();
        let policy = RetryPolicy::default();
        let mut seen = vec![];

        let result: Result<u32, TestError> = policy.run(&clock, "test", |attempt, _| {
            seen.push(clock.now());
            if attempt < 3 { Err(TestError::Flaky) } else { Ok(attempt) }
        });

        assert_eq!(result, Ok(3));
        assert_eq!(seen, vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(3)]);
    }

    #[test]
    fn test_fatal_errors_stop_immediately() {
        let clock = ManualClock::new();
        let mut calls = 0;
        let result: Result<(), TestError> = RetryPolicy::default().run(&clock, "test", |_, _| {
            calls += 1;
            Err(TestError::Fatal)
        });
        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_late_result_is_discarded() {
        let clock = ManualClock::new();
        let policy = RetryPolicy { max_attempts: 2, ..RetryPolicy::default() };
        let mut calls = 0;

        let result: Result<&str, TestError> = policy.run(&clock, "test", |attempt, _| {
            calls += 1;
            if attempt == 1 {
                clock.advance(Duration::from_secs(11));
            }
            Ok("done")
        });

        assert_eq!(result, Ok("done"));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_exhaustion_returns_last_error() {
        let clock = ManualClock::new();
        let result: Result<(), TestError> = RetryPolicy::default().run(&clock, "test", |_, deadline| {
            clock.advance(Duration::from_secs(20));
            deadline.check()?;
            Ok(())
        });
        assert_eq!(result, Err(TestError::Timeout));
        // 3 attempts x 20s + backoff 1s + 2s
        assert_eq!(clock.now(), Duration::from_secs(63));
    }

    #[test]
    fn test_deadline_remaining() {
        let clock = ManualClock::new();
        let deadline = Deadline::start(&clock, Duration::from_secs(10));
        clock.advance(Duration::from_secs(4));
        assert_eq!(deadline.remaining(), Duration::from_secs(6));
        assert!(deadline.check().is_ok());
        clock.advance(Duration::from_secs(7));
        assert_eq!(deadline.check(), Err(OperationTimeout { timeout: Duration::from_secs(10) }));
    }
}
