//! Retry and timeout policy for backend operations
//!
//! Every call that touches the backend daemon goes through a `RetryPolicy`:
//! bounded attempts, a per-attempt timeout, and an overall deadline that
//! wins over remaining attempts. Fatal errors short-circuit immediately.

use crate::error::{KilnError, KilnResult};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Reusable retry policy wrapping a fallible, possibly slow operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts before giving up
    pub max_attempts: u32,
    /// Upper bound on a single attempt
    pub attempt_timeout: Duration,
    /// Upper bound on the whole operation, attempts and backoff included
    pub overall_deadline: Duration,
    /// Initial pause between attempts, doubled after each failure
    pub initial_backoff: Duration,
    /// Cap on the backoff growth
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(120),
            overall_deadline: Duration::from_secs(600),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Policy for quick probes (readiness checks, status queries)
    pub fn probe() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(10),
            overall_deadline: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
        }
    }

    /// Run `f` under this policy.
    ///
    /// Each attempt is bounded by `attempt_timeout`; an overrun is abandoned
    /// and counted as a failure. The cumulative elapsed time is capped by
    /// `overall_deadline` regardless of attempts remaining. Errors for which
    /// [`KilnError::is_fatal`] holds are returned immediately without
    /// consuming retries.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> KilnResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = KilnResult<T>>,
    {
        let started = Instant::now();
        let mut backoff = self.initial_backoff;
        let mut last_error: Option<KilnError> = None;

        for attempt in 1..=self.max_attempts {
            if started.elapsed() >= self.overall_deadline {
                break;
            }

            let remaining = self.overall_deadline.saturating_sub(started.elapsed());
            let budget = self.attempt_timeout.min(remaining);

            match tokio::time::timeout(budget, f()).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Ok(Err(e)) if e.is_fatal() => {
                    debug!("{} failed fatally on attempt {}: {}", operation, attempt, e);
                    return Err(e);
                }
                Ok(Err(e)) => {
                    warn!("{} attempt {} failed: {}", operation, attempt, e);
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(
                        "{} attempt {} timed out after {:?}",
                        operation, attempt, budget
                    );
                    last_error = Some(KilnError::backend(
                        operation,
                        format!("attempt timed out after {}s", budget.as_secs()),
                    ));
                }
            }

            if attempt < self.max_attempts {
                let remaining = self.overall_deadline.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    break;
                }
                tokio::time::sleep(backoff.min(remaining)).await;
                backoff = (backoff * 2).min(self.max_backoff);
            }
        }

        // Deadline exceeded takes precedence over attempt exhaustion.
        if started.elapsed() >= self.overall_deadline {
            return Err(KilnError::OperationTimeout {
                operation: operation.to_string(),
                elapsed_secs: started.elapsed().as_secs(),
            });
        }

        Err(KilnError::RetryExhausted {
            operation: operation.to_string(),
            attempts: self.max_attempts,
            source: Box::new(
                last_error.unwrap_or_else(|| KilnError::backend(operation, "no attempts ran")),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            attempt_timeout: Duration::from_millis(200),
            overall_deadline: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn succeeds_first_attempt() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, KilnError>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .run("op", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(KilnError::backend("op", "flaky"))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: KilnResult<()> = fast_policy()
            .run("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(KilnError::backend("op", "always down"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            KilnError::RetryExhausted {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, KilnError::BackendCommunication { .. }));
            }
            other => panic!("expected RetryExhausted, got {other}"),
        }
    }

    #[tokio::test]
    async fn fatal_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: KilnResult<()> = fast_policy()
            .run("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(KilnError::PermissionDenied {
                    operation: "op".to_string(),
                    reason: "nope".to_string(),
                })
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            KilnError::PermissionDenied { .. }
        ));
    }

    #[tokio::test]
    async fn deadline_wins_over_attempts() {
        let policy = RetryPolicy {
            max_attempts: 100,
            attempt_timeout: Duration::from_millis(50),
            overall_deadline: Duration::from_millis(120),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };

        let result: KilnResult<()> = policy
            .run("op", || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            KilnError::OperationTimeout { .. }
        ));
    }

    #[tokio::test]
    async fn slow_attempt_counts_as_failure() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 2,
            attempt_timeout: Duration::from_millis(30),
            overall_deadline: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };

        let result = policy
            .run("op", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Ok::<_, KilnError>(1)
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
