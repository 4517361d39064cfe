use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::Result;

/// Why [`RetryPolicy::run`] gave up without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStop {
    /// Every attempt ran and missed
    Exhausted,
    /// The deadline left no room for another attempt
    Deadline,
}

/// Bounded polling: a fixed number of attempts, each with its own timeout,
/// separated by a fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub per_attempt_timeout: Duration,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 15,
            per_attempt_timeout: Duration::from_secs(10),
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, per_attempt_timeout: Duration, backoff: Duration) -> Self {
        Self {
            attempts,
            per_attempt_timeout,
            backoff,
        }
    }

    /// Longest time [`RetryPolicy::run`] can take when nothing is ever found.
    pub fn worst_case(&self) -> Duration {
        let gaps = self.attempts.saturating_sub(1);
        self.per_attempt_timeout.saturating_mul(self.attempts) + self.backoff.saturating_mul(gaps)
    }

    /// Poll `attempt` until it yields a value or the budget runs out.
    ///
    /// `attempt` receives the 1-based attempt number and the timeout it must
    /// honour. A timed-out or failed attempt counts as a miss. With a
    /// `deadline`, no attempt or backoff is started past it, and the last
    /// attempt's timeout shrinks to fit; stopping there yields
    /// [`RetryStop::Deadline`] rather than [`RetryStop::Exhausted`].
    pub async fn run<T, F, Fut>(
        &self,
        deadline: Option<Instant>,
        mut attempt: F,
    ) -> std::result::Result<T, RetryStop>
    where
        F: FnMut(u32, Duration) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        for n in 1..=self.attempts {
            let mut wait = self.per_attempt_timeout;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    tracing::debug!(attempt = n, "Retry deadline reached");
                    return Err(RetryStop::Deadline);
                }
                wait = wait.min(remaining);
            }

            match tokio::time::timeout(wait, attempt(n, wait)).await {
                Ok(Ok(Some(value))) => return Ok(value),
                Ok(Ok(None)) => tracing::debug!(attempt = n, "Attempt found nothing"),
                Ok(Err(e)) => tracing::debug!(attempt = n, error = %e, "Attempt failed"),
                Err(_) => tracing::debug!(attempt = n, timeout = ?wait, "Attempt timed out"),
            }

            if n == self.attempts {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() + self.backoff >= deadline {
                    tracing::debug!(attempt = n, "No budget left for another attempt");
                    return Err(RetryStop::Deadline);
                }
            }
            tokio::time::sleep(self.backoff).await;
        }
        Err(RetryStop::Exhausted)
    }
}
