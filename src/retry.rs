//! Bounded re-execution with exponential backoff and jitter.
//!
//! The policy knows nothing about breakers. The orchestrator decides what a
//! retried call is wrapped in.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::clock::CancelToken;

/// Classifies failures the policy may try again.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// How often and how patiently to re-run an operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,

    /// Upper bound of the random extra wait, as a fraction of the delay.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.2,
        }
    }
}

/// Why a retried operation ultimately failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailure<E> {
    /// Every attempt failed; holds the last error.
    Exhausted(E),

    /// An attempt failed with an error that is not worth retrying.
    Permanent(E),

    /// A stop signal arrived during a wait. Holds the last error, if any.
    Cancelled(Option<E>),
}

impl<E> RetryFailure<E> {
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Exhausted(e) | Self::Permanent(e) => Some(e),
            Self::Cancelled(e) => e.as_ref(),
        }
    }
}

/// Result of a retried operation plus how it got there.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, RetryFailure<E>>,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_fraction: 0.0,
        }
    }

    /// Delay before `attempt` (1-based), without jitter.
    ///
    /// `min(base * 2^(attempt - 2), max)` for attempt 2 and later, zero before.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        2u32.checked_pow(attempt - 2)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// `delay` plus a uniform extra in `[0, jitter_fraction * delay]`.
    fn jittered(&self, delay: Duration) -> Duration {
        let spread = delay.as_secs_f64() * self.jitter_fraction;
        if spread <= 0.0 {
            return delay;
        }
        delay + Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=spread))
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts,
    /// or `cancel` fires during a wait.
    ///
    /// `on_attempt` sees every attempt's number and its error (`None` on
    /// success), in order, before any wait.
    pub fn run<T, E, F, A>(&self, cancel: &CancelToken, mut op: F, mut on_attempt: A) -> RetryOutcome<T, E>
    where
        E: Retryable,
        F: FnMut() -> Result<T, E>,
        A: FnMut(u32, Option<&E>),
    {
        let start = Instant::now();
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match op() {
                Ok(value) => {
                    on_attempt(attempt, None);
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                        elapsed: start.elapsed(),
                    };
                }
                Err(err) => err,
            };
            on_attempt(attempt, Some(&err));

            let failure = if !err.is_transient() {
                Some(RetryFailure::Permanent(err))
            } else if attempt >= max_attempts {
                Some(RetryFailure::Exhausted(err))
            } else {
                let delay = self.jittered(self.backoff(attempt + 1));
                tracing::warn!(attempt, max_attempts, ?delay, "attempt failed, backing off");
                if cancel.wait(delay) {
                    Some(RetryFailure::Cancelled(Some(err)))
                } else {
                    None
                }
            };

            if let Some(failure) = failure {
                return RetryOutcome {
                    result: Err(failure),
                    attempts: attempt,
                    elapsed: start.elapsed(),
                };
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;
    use std::thread;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky(u32),
        Broken,
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, Self::Flaky(_))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            jitter_fraction: 0.0,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter_fraction: 0.0,
        };
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(4));
        assert_eq!(policy.backoff(5), Duration::from_secs(5));
        assert_eq!(policy.backoff(64), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryPolicy {
            jitter_fraction: 0.5,
            ..fast_policy()
        };
        let delay = Duration::from_millis(100);
        for _ in 0..100 {
            let j = policy.jittered(delay);
            assert!(j >= delay && j <= Duration::from_millis(150), "{j:?}");
        }
    }

    #[test]
    fn succeeds_on_third_attempt() {
        let calls = Cell::new(0);
        let outcome = fast_policy().run(
            &CancelToken::new(),
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(TestError::Flaky(calls.get()))
                } else {
                    Ok("done")
                }
            },
            |_, _| {},
        );

        assert_eq!(outcome.result, Ok("done"));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhaustion_reports_last_error_and_waits_between_attempts() {
        let policy = fast_policy();
        let calls = Cell::new(0);
        let outcome: RetryOutcome<(), _> = policy.run(
            &CancelToken::new(),
            || {
                calls.set(calls.get() + 1);
                Err(TestError::Flaky(calls.get()))
            },
            |_, _| {},
        );

        assert_eq!(outcome.result, Err(RetryFailure::Exhausted(TestError::Flaky(3))));
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.elapsed >= policy.backoff(2) + policy.backoff(3));
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let outcome: RetryOutcome<(), _> = fast_policy().run(
            &CancelToken::new(),
            || {
                calls.set(calls.get() + 1);
                Err(TestError::Broken)
            },
            |_, _| {},
        );

        assert_eq!(outcome.result, Err(RetryFailure::Permanent(TestError::Broken)));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn every_attempt_is_reported_in_order() {
        let mut seen = Vec::new();
        let calls = Cell::new(0);
        let _ = fast_policy().run(
            &CancelToken::new(),
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 2 {
                    Err(TestError::Flaky(1))
                } else {
                    Ok(())
                }
            },
            |n, err| seen.push((n, err.is_some())),
        );

        assert_eq!(seen, vec![(1, true), (2, false)]);
    }

    #[test]
    fn cancel_during_wait_stops_remaining_attempts() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            ..fast_policy()
        };
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.cancel();
        });

        let calls = Cell::new(0);
        let outcome: RetryOutcome<(), _> = policy.run(
            &cancel,
            || {
                calls.set(calls.get() + 1);
                Err(TestError::Flaky(calls.get()))
            },
            |_, _| {},
        );
        handle.join().unwrap();

        assert_eq!(
            outcome.result,
            Err(RetryFailure::Cancelled(Some(TestError::Flaky(1))))
        );
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.elapsed < Duration::from_secs(30));
    }

    #[test]
    fn zero_max_attempts_still_tries_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..fast_policy()
        };
        let outcome: RetryOutcome<(), _> =
            policy.run(&CancelToken::new(), || Err(TestError::Flaky(1)), |_, _| {});
        assert_eq!(outcome.attempts, 1);
    }
}
