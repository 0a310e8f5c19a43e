//! Rate-limited retry executor
//!
//! Wraps remote calls with exponential backoff and random jitter. Transient
//! failures (rate limits, 5xx, network errors) are retried up to the
//! configured attempt count; permanent failures surface immediately.
//! Whether a surfaced failure aborts anything is the caller's decision.

use std::time::Duration;

use log::{debug, warn};
use rand::Rng;

use crate::error::{FailureClass, MigrationError, ProviderError};
use crate::throttle::{CancelToken, Sleeper};

/// Backoff parameters for one call family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first call included (> 0)
    pub max_attempts: u32,
    /// Wait after the first failed attempt
    pub base_delay: Duration,
    /// Upper bound for the exponential part of a wait
    pub max_delay: Duration,
    /// Upper bound for the random jitter added to every wait
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(64),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt count and no waiting at all
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Exponential part of the wait after failed attempt `attempt` (1-based)
    ///
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Wait before the next attempt, honoring a server retry hint
    fn wait_after(&self, attempt: u32, error: &ProviderError) -> Duration {
        let backoff = self.backoff(attempt);
        let hinted = error
            .retry_after()
            .map(|hint| hint.min(self.max_delay))
            .unwrap_or(Duration::ZERO);
        backoff.max(hinted) + jitter(self.max_jitter)
    }
}

/// Random jitter in `[0, max]`
fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = max.as_millis().min(u64::MAX as u128) as u64;
    Duration::from_millis(rand::rng().random_range(0..=millis))
}

/// Counters exposed for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Operations run through the executor
    pub calls: u64,
    /// Individual attempts, retries included
    pub attempts: u64,
    /// Attempts beyond the first for an operation
    pub retries: u64,
    /// Operations that ultimately failed
    pub failures: u64,
    /// Time spent waiting between attempts
    pub total_wait: Duration,
}

/// Runs remote operations under a [`RetryPolicy`]
pub struct RetryExecutor<'a> {
    family: &'static str,
    policy: RetryPolicy,
    sleeper: &'a dyn Sleeper,
    cancel: CancelToken,
    stats: RetryStats,
}

impl<'a> RetryExecutor<'a> {
    /// Create an executor for one call family (e.g. "read", "write")
    pub fn new(family: &'static str, policy: RetryPolicy, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            family,
            policy,
            sleeper,
            cancel: CancelToken::new(),
            stats: RetryStats::default(),
        }
    }

    /// Stop retrying once `cancel` is set
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> RetryStats {
        self.stats
    }

    /// Run `f` until it succeeds, fails permanently, or attempts run out
    ///
    /// A cancellation seen between attempts ends the call with
    /// [`MigrationError::Interrupted`].
    pub fn run<T, F>(&mut self, operation: &str, mut f: F) -> Result<T, MigrationError>
    where
        F: FnMut() -> Result<T, ProviderError>,
    {
        self.stats.calls += 1;
        let max_attempts = self.policy.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.stats.attempts += 1;
            if attempt > 1 {
                self.stats.retries += 1;
            }

            let error = match f() {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if error.class() == FailureClass::Permanent {
                self.stats.failures += 1;
                return Err(MigrationError::PermanentFailure {
                    operation: operation.to_string(),
                    source: error,
                });
            }

            if attempt >= max_attempts {
                self.stats.failures += 1;
                warn!(
                    "[{}] {} gave up after {} attempts: {}",
                    self.family, operation, attempt, error
                );
                return Err(match error {
                    ProviderError::RateLimited { .. } => MigrationError::RateLimitExceeded {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: error,
                    },
                    _ => MigrationError::TransientFailure {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: error,
                    },
                });
            }

            if self.cancel.is_cancelled() {
                return Err(self.interrupted(operation, attempt));
            }

            let wait = self.policy.wait_after(attempt, &error);
            debug!(
                "[{}] {} attempt {}/{} failed ({}), retrying in {:?}",
                self.family, operation, attempt, max_attempts, error, wait
            );
            self.sleeper.sleep(wait);
            self.stats.total_wait += wait;

            if self.cancel.is_cancelled() {
                return Err(self.interrupted(operation, attempt));
            }
        }
    }

    fn interrupted(&mut self, operation: &str, attempts: u32) -> MigrationError {
        self.stats.failures += 1;
        debug!(
            "[{}] {} interrupted after {} attempts",
            self.family, operation, attempts
        );
        MigrationError::Interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::{RecordingSleeper, ThreadSleeper};
    use std::cell::Cell;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            max_jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let p = policy(10);
        let delays: Vec<u64> = (1..=6).map(|a| p.backoff(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
    }

    #[test]
    fn test_backoff_handles_huge_attempts() {
        let p = policy(u32::MAX);
        assert_eq!(p.backoff(u32::MAX), Duration::from_secs(8));
    }

    #[test]
    fn test_success_on_first_attempt() {
        let sleeper = RecordingSleeper::new();
        let mut exec = RetryExecutor::new("read", policy(3), &sleeper);

        let value = exec.run("list", || Ok::<_, ProviderError>(42)).unwrap();
        assert_eq!(value, 42);
        assert_eq!(exec.stats().attempts, 1);
        assert!(sleeper.waits().is_empty());
    }

    #[test]
    fn test_transient_then_success() {
        let sleeper = RecordingSleeper::new();
        let mut exec = RetryExecutor::new("read", policy(5), &sleeper);
        let calls = Cell::new(0);

        let value = exec
            .run("fetch", || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(ProviderError::Transient("503".into()))
                } else {
                    Ok("done")
                }
            })
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.get(), 3);
        assert_eq!(
            sleeper.waits(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        let stats = exec.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.total_wait, Duration::from_secs(3));
    }

    #[test]
    fn test_never_exceeds_max_attempts() {
        let sleeper = RecordingSleeper::new();
        let mut exec = RetryExecutor::new("write", policy(4), &sleeper);
        let calls = Cell::new(0);

        let err = exec
            .run("insert", || {
                calls.set(calls.get() + 1);
                Err::<(), _>(ProviderError::rate_limited("quota"))
            })
            .unwrap_err();

        assert_eq!(calls.get(), 4);
        assert!(matches!(
            err,
            MigrationError::RateLimitExceeded { attempts: 4, .. }
        ));
        // One wait between each pair of attempts, non-decreasing
        let waits = sleeper.waits();
        assert_eq!(waits.len(), 3);
        assert!(waits.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_exhausted_transient_is_transient_failure() {
        let sleeper = RecordingSleeper::new();
        let mut exec = RetryExecutor::new("read", policy(2), &sleeper);

        let err = exec
            .run("fetch", || Err::<(), _>(ProviderError::Transient("reset".into())))
            .unwrap_err();
        assert!(matches!(
            err,
            MigrationError::TransientFailure { attempts: 2, .. }
        ));
        assert_eq!(exec.stats().failures, 1);
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let sleeper = RecordingSleeper::new();
        let mut exec = RetryExecutor::new("read", policy(5), &sleeper);
        let calls = Cell::new(0);

        let err = exec
            .run("fetch", || {
                calls.set(calls.get() + 1);
                Err::<(), _>(ProviderError::PermissionDenied("m7".into()))
            })
            .unwrap_err();

        assert_eq!(calls.get(), 1);
        assert!(matches!(err, MigrationError::PermanentFailure { .. }));
        assert!(sleeper.waits().is_empty());
    }

    #[test]
    fn test_retry_after_hint_extends_wait() {
        let sleeper = RecordingSleeper::new();
        let mut exec = RetryExecutor::new("write", policy(2), &sleeper);
        let calls = Cell::new(0);

        exec.run("insert", || {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Err(ProviderError::RateLimited {
                    message: "quota".into(),
                    retry_after: Some(Duration::from_secs(5)),
                })
            } else {
                Ok(())
            }
        })
        .unwrap();

        assert_eq!(sleeper.waits(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn test_cancel_stops_retrying() {
        let cancel = CancelToken::new();
        let sleeper = ThreadSleeper::new(cancel.clone());
        let mut p = policy(10);
        p.base_delay = Duration::from_secs(3600);
        p.max_delay = Duration::from_secs(3600);
        let mut exec = RetryExecutor::new("write", p, &sleeper).with_cancel(cancel.clone());
        let calls = Cell::new(0);

        let start = std::time::Instant::now();
        let err = exec
            .run("insert", || {
                calls.set(calls.get() + 1);
                cancel.cancel();
                Err::<(), _>(ProviderError::rate_limited("quota"))
            })
            .unwrap_err();

        assert!(matches!(err, MigrationError::Interrupted));
        assert_eq!(calls.get(), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancel_during_backoff_skips_next_attempt() {
        struct CancellingSleeper(CancelToken);
        impl Sleeper for CancellingSleeper {
            fn sleep(&self, _duration: Duration) {
                self.0.cancel();
            }
        }

        let cancel = CancelToken::new();
        let sleeper = CancellingSleeper(cancel.clone());
        let mut exec = RetryExecutor::new("read", policy(5), &sleeper).with_cancel(cancel);
        let calls = Cell::new(0);

        let err = exec
            .run("fetch", || {
                calls.set(calls.get() + 1);
                Err::<(), _>(ProviderError::Transient("503".into()))
            })
            .unwrap_err();

        assert!(matches!(err, MigrationError::Interrupted));
        assert_eq!(calls.get(), 1);
        assert_eq!(exec.stats().failures, 1);
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let p = policy(2);
        let err = ProviderError::RateLimited {
            message: "quota".into(),
            retry_after: Some(Duration::from_secs(3600)),
        };
        assert_eq!(p.wait_after(1, &err), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut p = policy(3);
        p.max_jitter = Duration::from_millis(250);
        for _ in 0..50 {
            let wait = p.wait_after(1, &ProviderError::Transient("x".into()));
            assert!(wait >= Duration::from_secs(1));
            assert!(wait <= Duration::from_millis(1250));
        }
    }
}
