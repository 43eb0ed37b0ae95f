//! Per-operation-class circuit breakers.
//!
//! One [`CircuitBreaker`] owns the keyed table of every class's
//! [`CircuitState`]. It is injected into the orchestrator; persistence is an
//! explicit [`CircuitBreaker::snapshot`] / [`CircuitBreaker::restore`] pair
//! at process boundaries.
//!
//! Every transition happens under the table lock, so a check-then-update
//! is one atomic read-modify-write.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use jiff::Timestamp;

use crate::config::{BreakerSettings, Config};
use crate::model::{BreakerState, CircuitState};

/// Whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Closed: pass through.
    Allowed,

    /// Half-open: this call is the single probe.
    Probe,

    /// Open, or a probe is already out. Do not attempt the call.
    Rejected { retry_in: Duration },
}

/// A state change, reported so callers can log and audit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub class: String,
    pub from: BreakerState,
    pub to: BreakerState,
}

#[derive(Debug, Default)]
struct Circuit {
    state: CircuitState,
    probe_in_flight: bool,
}

/// The keyed breaker table.
#[derive(Debug)]
pub struct CircuitBreaker {
    circuits: Mutex<BTreeMap<String, Circuit>>,
    defaults: BreakerSettings,
    overrides: BTreeMap<String, BreakerSettings>,
}

impl CircuitBreaker {
    pub fn new(defaults: BreakerSettings, overrides: BTreeMap<String, BreakerSettings>) -> Self {
        Self {
            circuits: Mutex::new(BTreeMap::new()),
            defaults,
            overrides,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(BreakerSettings::default(), config.breaker.clone())
    }

    fn settings(&self, class: &str) -> BreakerSettings {
        self.overrides.get(class).copied().unwrap_or(self.defaults)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the table with previously persisted state.
    pub fn restore(&self, table: BTreeMap<String, CircuitState>) {
        let mut circuits = self.lock();
        circuits.clear();
        for (class, state) in table {
            circuits.insert(
                class,
                Circuit {
                    state,
                    probe_in_flight: false,
                },
            );
        }
    }

    /// Copy of every class's state, for persisting.
    pub fn snapshot(&self) -> BTreeMap<String, CircuitState> {
        self.lock()
            .iter()
            .map(|(class, c)| (class.clone(), c.state.clone()))
            .collect()
    }

    #[cfg(test)]
    pub fn state(&self, class: &str) -> CircuitState {
        self.lock()
            .get(class)
            .map(|c| c.state.clone())
            .unwrap_or_default()
    }

    /// Ask to make a call. Moves OPEN to HALF_OPEN once the cooldown has
    /// elapsed, and hands out at most one probe while half-open.
    pub fn try_acquire(&self, class: &str, now: Timestamp) -> (Admission, Option<Transition>) {
        let cooldown = self.settings(class).cooldown();
        let mut circuits = self.lock();
        let circuit = circuits.entry(class.to_string()).or_default();

        match circuit.state.state {
            BreakerState::Closed => (Admission::Allowed, None),
            BreakerState::HalfOpen if circuit.probe_in_flight => (
                Admission::Rejected {
                    retry_in: Duration::ZERO,
                },
                None,
            ),
            BreakerState::HalfOpen => {
                circuit.probe_in_flight = true;
                (Admission::Probe, None)
            }
            BreakerState::Open => {
                let remaining = remaining_cooldown(circuit.state.opened_at, now, cooldown);
                if remaining.is_zero() {
                    circuit.state.state = BreakerState::HalfOpen;
                    circuit.probe_in_flight = true;
                    let transition = Transition {
                        class: class.to_string(),
                        from: BreakerState::Open,
                        to: BreakerState::HalfOpen,
                    };
                    (Admission::Probe, Some(transition))
                } else {
                    (Admission::Rejected { retry_in: remaining }, None)
                }
            }
        }
    }

    /// Count a completed call that succeeded.
    pub fn record_success(&self, class: &str) -> Option<Transition> {
        let mut circuits = self.lock();
        let circuit = circuits.entry(class.to_string()).or_default();
        let from = circuit.state.state;

        circuit.probe_in_flight = false;
        circuit.state = CircuitState::default();

        (from != BreakerState::Closed).then(|| Transition {
            class: class.to_string(),
            from,
            to: BreakerState::Closed,
        })
    }

    /// Count a completed call that failed.
    pub fn record_failure(&self, class: &str, now: Timestamp) -> Option<Transition> {
        let threshold = self.settings(class).threshold;
        let mut circuits = self.lock();
        let circuit = circuits.entry(class.to_string()).or_default();
        let from = circuit.state.state;

        circuit.probe_in_flight = false;
        circuit.state.consecutive_failures = circuit.state.consecutive_failures.saturating_add(1);

        let trips = match from {
            BreakerState::Closed => circuit.state.consecutive_failures >= threshold,
            // A failed probe reopens and restarts the cooldown.
            BreakerState::HalfOpen => true,
            BreakerState::Open => false,
        };
        if !trips {
            return None;
        }

        circuit.state.state = BreakerState::Open;
        circuit.state.opened_at = Some(now);
        Some(Transition {
            class: class.to_string(),
            from,
            to: BreakerState::Open,
        })
    }

    /// Hand back an admission without counting it either way.
    ///
    /// Used when a call was abandoned, e.g. cancelled mid-retry.
    pub fn release(&self, class: &str) {
        if let Some(circuit) = self.lock().get_mut(class) {
            circuit.probe_in_flight = false;
        }
    }
}

/// Time left before an open breaker may probe. Zero when elapsed.
fn remaining_cooldown(opened_at: Option<Timestamp>, now: Timestamp, cooldown: Duration) -> Duration {
    let Some(opened_at) = opened_at else {
        return Duration::ZERO;
    };
    let elapsed_ms = now.as_millisecond().saturating_sub(opened_at.as_millisecond());
    let elapsed = Duration::from_millis(u64::try_from(elapsed_ms).unwrap_or(0));
    cooldown.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;

    use crate::clock::Clock;
    use crate::clock::testing::ManualClock;

    const CLASS: &str = "report-delivery";

    /// Result of a guarded call.
    #[derive(Debug, PartialEq, Eq)]
    enum Guarded<T, E> {
        Ok(T),
        Failed(E),
        CircuitOpen { retry_in: Duration },
    }

    /// Run `op` the way the orchestrator does: acquire, call, record.
    fn call<T, E>(
        b: &CircuitBreaker,
        class: &str,
        now: Timestamp,
        op: impl FnOnce() -> Result<T, E>,
    ) -> Guarded<T, E> {
        if let (Admission::Rejected { retry_in }, _) = b.try_acquire(class, now) {
            return Guarded::CircuitOpen { retry_in };
        }
        match op() {
            Ok(value) => {
                b.record_success(class);
                Guarded::Ok(value)
            }
            Err(err) => {
                b.record_failure(class, now);
                Guarded::Failed(err)
            }
        }
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            BreakerSettings {
                threshold: 3,
                cooldown_secs: 300,
            },
            BTreeMap::new(),
        )
    }

    fn fail(b: &CircuitBreaker, clock: &ManualClock, calls: &Cell<u32>) -> Guarded<(), &'static str> {
        call(b, CLASS, clock.now(), || {
            calls.set(calls.get() + 1);
            Err("down")
        })
    }

    fn trip(b: &CircuitBreaker, clock: &ManualClock) {
        let calls = Cell::new(0);
        for _ in 0..3 {
            fail(b, clock, &calls);
        }
        assert_eq!(b.state(CLASS).state, BreakerState::Open);
    }

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let b = breaker();
        let clock = ManualClock::new();
        let calls = Cell::new(0);

        fail(&b, &clock, &calls);
        fail(&b, &clock, &calls);
        assert_eq!(b.state(CLASS).state, BreakerState::Closed);
        assert_eq!(b.state(CLASS).consecutive_failures, 2);

        fail(&b, &clock, &calls);
        let state = b.state(CLASS);
        assert_eq!(state.state, BreakerState::Open);
        assert_eq!(state.opened_at, Some(clock.now()));
    }

    #[test]
    fn success_while_closed_resets_count() {
        let b = breaker();
        let clock = ManualClock::new();
        let calls = Cell::new(0);

        fail(&b, &clock, &calls);
        fail(&b, &clock, &calls);
        let ok: Guarded<(), ()> = call(&b, CLASS, clock.now(), || Ok(()));
        assert_eq!(ok, Guarded::Ok(()));

        let state = b.state(CLASS);
        assert_eq!(state.state, BreakerState::Closed);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn open_rejects_without_invoking_operation() {
        let b = breaker();
        let clock = ManualClock::new();
        trip(&b, &clock);

        clock.advance(Duration::from_secs(60));
        let calls = Cell::new(0);
        let result = fail(&b, &clock, &calls);

        assert_eq!(
            result,
            Guarded::CircuitOpen {
                retry_in: Duration::from_secs(240)
            }
        );
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn after_cooldown_exactly_one_probe_is_admitted() {
        let b = breaker();
        let clock = ManualClock::new();
        trip(&b, &clock);
        clock.advance(Duration::from_secs(300));

        let (first, transition) = b.try_acquire(CLASS, clock.now());
        assert_eq!(first, Admission::Probe);
        assert_eq!(transition.map(|t| t.to), Some(BreakerState::HalfOpen));

        let (second, _) = b.try_acquire(CLASS, clock.now());
        assert!(matches!(second, Admission::Rejected { .. }));
    }

    #[test]
    fn successful_probe_closes() {
        let b = breaker();
        let clock = ManualClock::new();
        trip(&b, &clock);
        clock.advance(Duration::from_secs(301));

        let ok: Guarded<(), ()> = call(&b, CLASS, clock.now(), || Ok(()));
        assert_eq!(ok, Guarded::Ok(()));
        assert_eq!(b.state(CLASS), CircuitState::default());
    }

    #[test]
    fn failed_probe_reopens_and_restarts_cooldown() {
        let b = breaker();
        let clock = ManualClock::new();
        trip(&b, &clock);
        clock.advance(Duration::from_secs(301));

        let calls = Cell::new(0);
        assert_eq!(fail(&b, &clock, &calls), Guarded::Failed("down"));
        assert_eq!(calls.get(), 1);

        let state = b.state(CLASS);
        assert_eq!(state.state, BreakerState::Open);
        assert_eq!(state.opened_at, Some(clock.now()));

        clock.advance(Duration::from_secs(299));
        assert!(matches!(fail(&b, &clock, &calls), Guarded::CircuitOpen { .. }));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn released_probe_can_be_retaken() {
        let b = breaker();
        let clock = ManualClock::new();
        trip(&b, &clock);
        clock.advance(Duration::from_secs(300));

        assert_eq!(b.try_acquire(CLASS, clock.now()).0, Admission::Probe);
        b.release(CLASS);
        assert_eq!(b.state(CLASS).state, BreakerState::HalfOpen);
        assert_eq!(b.try_acquire(CLASS, clock.now()).0, Admission::Probe);
    }

    #[test]
    fn classes_are_independent_and_tunable() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "price-storage".to_string(),
            BreakerSettings {
                threshold: 1,
                cooldown_secs: 60,
            },
        );
        let b = CircuitBreaker::new(BreakerSettings::default(), overrides);
        let now = ManualClock::new().now();

        b.record_failure("price-storage", now);
        b.record_failure(CLASS, now);

        assert_eq!(b.state("price-storage").state, BreakerState::Open);
        assert_eq!(b.state(CLASS).state, BreakerState::Closed);
    }

    #[test]
    fn snapshot_and_restore_carry_state_across_instances() {
        let b = breaker();
        let clock = ManualClock::new();
        trip(&b, &clock);

        let next = breaker();
        next.restore(b.snapshot());
        assert_eq!(next.state(CLASS), b.state(CLASS));
        assert!(matches!(
            next.try_acquire(CLASS, clock.now()).0,
            Admission::Rejected { .. }
        ));
    }
}
