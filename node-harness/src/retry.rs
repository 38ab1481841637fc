//! Bounded fixed-delay retry policy
//!
//! Shared by the readiness poll, the block wait and the tx-by-hash lookup.
//! Every loop is capped at `attempts` tries and observes a cancellation token
//! between tries, so a caller can always bound the wall-clock time.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of a retry loop that did not produce a value
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; `last` is the final one
    Exhausted { attempts: u32, last: E },
    /// The classifier marked the error terminal
    Aborted(E),
    /// Cancellation token fired
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn fixed(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Readiness poll: 40 x 3s
    pub const fn readiness() -> Self {
        Self::fixed(40, Duration::from_secs(3))
    }

    /// Tx lookup after submission: 15 x 200ms (3s total)
    pub const fn tx_lookup() -> Self {
        Self::fixed(15, Duration::from_millis(200))
    }

    /// Upper bound on time spent sleeping between attempts
    pub fn max_wait(&self) -> Duration {
        self.delay * self.attempts.saturating_sub(1)
    }

    /// Run `op` until it succeeds, the classifier rejects an error, the
    /// attempt budget runs out, or `cancel` fires.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        cancel: &CancellationToken,
        should_retry: C,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                r = op(attempt) => r,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !should_retry(&err) {
                return Err(RetryError::Aborted(err));
            }
            if attempt >= attempts {
                return Err(RetryError::Exhausted {
                    attempts,
                    last: err,
                });
            }

            debug!("Attempt {}/{} failed, retrying in {:?}", attempt, attempts, self.delay);

            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
            attempt += 1;
        }
    }
}
