//! Time sources and cancellation.
//!
//! Breaker cooldowns and outcome timestamps read the time through [`Clock`]
//! so tests can move it by hand. Retry waits go through [`CancelToken`] so
//! an external stop signal cuts them short.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use jiff::Timestamp;

/// A source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A cloneable stop flag with interruptible waits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every waiter.
    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block for `duration` or until cancelled, whichever comes first.
    ///
    /// Returns `true` if the wait ended because of cancellation.
    pub fn wait(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);
        // Loop: condvars wake spuriously.
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cancelled = cvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

#[cfg(test)]
pub mod testing {
    //! A hand-driven clock for tests.

    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    use jiff::Timestamp;

    use super::Clock;

    #[derive(Debug)]
    pub struct ManualClock {
        millis: AtomicI64,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                millis: AtomicI64::new(1_700_000_000_000),
            }
        }

        pub fn advance(&self, by: Duration) {
            let ms = i64::try_from(by.as_millis()).unwrap();
            self.millis.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Timestamp {
            Timestamp::from_millisecond(self.millis.load(Ordering::SeqCst)).unwrap()
        }
    }
}
