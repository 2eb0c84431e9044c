use crate::error::{Error, Result};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// How failed API calls are repeated.
///
/// A busy API should not fail the whole run, so by default calls are
/// retried forever with a fixed pause in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between attempts
    pub delay: Duration,

    /// Total attempts allowed; `None` retries until success
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Calls `op` until it succeeds, a non-retryable error occurs, or the
    /// attempt limit is reached.
    ///
    /// `op` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or
    /// [`Error::RetriesExhausted`] wrapping the last failure.
    pub fn run<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let mut attempt = 1u32;
        loop {
            let err = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if self.max_attempts.is_some_and(|max| attempt >= max) {
                return Err(Error::retries_exhausted(attempt, err));
            }

            warn!(
                "Failed to generate response (retrying in {} sec). Error: {}",
                self.delay.as_secs(),
                err
            );
            thread::sleep(self.delay);
            info!("Retrying...");

            attempt = attempt.saturating_add(1);
        }
    }
}
