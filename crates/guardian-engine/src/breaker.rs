//! Per-check circuit breaker.
//!
//! ```text
//!            failures in window >= threshold
//!   Closed ───────────────────────────────────▶ Open
//!     ▲                                         │  ▲
//!     │ all trials succeed     now >= open_until│  │ any trial fails
//!     │                                         ▼  │
//!     └──────────────────────────────────── HalfOpen
//! ```
//!
//! Every read and transition happens under one mutex per breaker, so
//! contention is scoped to a single check name. Admission is by
//! [`BreakerPermit`]: a caller that gets a permit must settle it with
//! `succeed` or `fail`; a permit dropped unsettled (an abandoned call) only
//! returns its trial slot and does not count either way.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use guardian_contracts::breaker::{BreakerState, CircuitBreakerState};
use guardian_core::clock::Clock;

use crate::config::BreakerSettings;

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    /// Bumped on every transition; permits from an earlier generation are
    /// settled as no-ops.
    generation: u64,
    failures: VecDeque<DateTime<Utc>>,
    success_count: u32,
    opened_at: Option<DateTime<Utc>>,
    open_until: Option<DateTime<Utc>>,
    trials_in_flight: u32,
    trials_succeeded: u32,
}

pub struct CircuitBreaker {
    check_name: String,
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(check_name: impl Into<String>, settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            check_name: check_name.into(),
            settings,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                generation: 0,
                failures: VecDeque::new(),
                success_count: 0,
                opened_at: None,
                open_until: None,
                trials_in_flight: 0,
                trials_succeeded: 0,
            }),
        }
    }

    pub fn check_name(&self) -> &str {
        &self.check_name
    }

    /// Ask to invoke the guarded check.
    ///
    /// Returns `None` while open, or while half-open with every trial slot
    /// taken. Never blocks beyond the breaker's own mutex.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if inner.state == BreakerState::Open {
            if inner.open_until.is_some_and(|until| now < until) {
                return None;
            }
            self.transition(&mut inner, BreakerState::HalfOpen, now);
        }

        let trial = match inner.state {
            BreakerState::Closed => false,
            BreakerState::HalfOpen => {
                if inner.trials_in_flight + inner.trials_succeeded >= self.settings.half_open_trial_budget {
                    return None;
                }
                inner.trials_in_flight += 1;
                true
            }
            BreakerState::Open => return None,
        };

        Some(BreakerPermit {
            breaker: self,
            generation: inner.generation,
            trial,
            settled: false,
        })
    }

    /// A point-in-time copy of the breaker for operators.
    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.lock();
        CircuitBreakerState {
            check_name: self.check_name.clone(),
            state: inner.state,
            failure_count: u32::try_from(inner.failures.len()).unwrap_or(u32::MAX),
            success_count: inner.success_count,
            opened_at: inner.opened_at,
            open_until: inner.open_until,
            half_open_trial_budget: self.settings.half_open_trial_budget,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    fn on_success(&self, generation: u64, trial: bool) {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.success_count = inner.success_count.saturating_add(1);
        if trial {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            inner.trials_succeeded += 1;
            if inner.trials_succeeded >= self.settings.half_open_trial_budget {
                self.transition(&mut inner, BreakerState::Closed, now);
            }
        }
    }

    fn on_failure(&self, generation: u64, trial: bool) {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        if trial {
            self.transition(&mut inner, BreakerState::Open, now);
            return;
        }

        inner.failures.push_back(now);
        let horizon = chrono::Duration::from_std(self.settings.window())
            .ok()
            .and_then(|w| now.checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        while inner.failures.front().is_some_and(|t| *t <= horizon) {
            inner.failures.pop_front();
        }

        debug!(
            check = %self.check_name,
            failures = inner.failures.len(),
            threshold = self.settings.failure_threshold,
            "breaker recorded failure"
        );
        if inner.failures.len() >= self.settings.failure_threshold as usize {
            self.transition(&mut inner, BreakerState::Open, now);
        }
    }

    fn on_abandon(&self, generation: u64, trial: bool) {
        let mut inner = self.lock();
        if trial && inner.generation == generation {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: DateTime<Utc>) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.failures.clear();
        inner.success_count = 0;
        inner.trials_in_flight = 0;
        inner.trials_succeeded = 0;

        match to {
            BreakerState::Open => {
                let until = chrono::Duration::from_std(self.settings.cooldown())
                    .ok()
                    .and_then(|c| now.checked_add_signed(c))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                inner.opened_at = Some(now);
                inner.open_until = Some(until);
            }
            BreakerState::Closed => {
                inner.opened_at = None;
                inner.open_until = None;
            }
            BreakerState::HalfOpen => {}
        }

        info!(
            check = %self.check_name,
            from = ?from,
            to = ?to,
            open_until = ?inner.open_until,
            "breaker transition"
        );
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Permission to make one call through a breaker.
#[must_use = "a permit must be settled with succeed() or fail()"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this call is a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.generation, self.trial);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.generation, self.trial);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandon(self.generation, self.trial);
        }
    }
}
