//! Fixed-delay retry policy
//!
//! Separated from the HTTP client so the retry budget, the delay and the
//! decision of what counts as transient can be tested with a manual clock.

use log::warn;
use std::time::Duration;

use crate::clock::{CancelToken, Clock};

/// How a failed attempt should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retry,
    Fail,
}

/// Outcome of a retried operation that did not succeed
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with a non-retryable error
    Fatal(E),
    /// Cancellation was observed at a retry boundary
    Cancelled,
}

/// Retry up to `max_retries` times after the first attempt, sleeping
/// `delay` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total number of attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `op` until it succeeds, fails fatally, or the budget runs out.
    ///
    /// `op` receives the 1-based attempt number. `classify` decides whether
    /// an error is worth another attempt. Cancellation is checked before
    /// every attempt.
    pub fn run<T, E, F, C>(
        &self,
        clock: &dyn Clock,
        cancel: &CancelToken,
        mut op: F,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        C: Fn(&E) -> Verdict,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            attempt += 1;

            let err = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if classify(&err) == Verdict::Fail {
                return Err(RetryError::Fatal(err));
            }

            if attempt >= max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            warn!(
                "Transient failure ({}), retry {}/{} in {:?}",
                err, attempt, self.max_retries, self.delay
            );
            clock.sleep(self.delay);
        }
    }
}
