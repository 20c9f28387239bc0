//! In-memory usage and rate counters.
//!
//! Reference implementations of the `UsageCounter` and `RateLimiter`
//! collaborators. Single-process only; a deployment that spans processes
//! supplies its own shared implementations.
//!
//! Each check-and-record happens under one lock, so concurrent presentations
//! of the same lineage can never overspend a limit.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use guardian_core::traits::{RateLimiter, UsageCounter};

/// Acquisitions between sweeps of idle lineages.
const SWEEP_INTERVAL: u32 = 256;

#[derive(Debug, Default)]
pub struct InMemoryUsageCounter {
    uses: Mutex<HashMap<String, u64>>,
}

impl InMemoryUsageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lineages with recorded uses.
    pub fn tracked_lineages(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.uses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UsageCounter for InMemoryUsageCounter {
    fn uses(&self, lineage_id: &str) -> u64 {
        self.lock().get(lineage_id).copied().unwrap_or(0)
    }

    fn try_consume(&self, lineage_id: &str, limit: u64) -> bool {
        let mut uses = self.lock();
        let used = uses.get(lineage_id).copied().unwrap_or(0);
        if used >= limit {
            return false;
        }
        uses.insert(lineage_id.to_string(), used + 1);
        true
    }

    fn refund(&self, lineage_id: &str) {
        let mut uses = self.lock();
        if let Some(used) = uses.get_mut(lineage_id) {
            *used = used.saturating_sub(1);
            if *used == 0 {
                uses.remove(lineage_id);
            }
        }
    }
}

/// Call timestamps for one lineage, kept for its longest window.
#[derive(Debug)]
struct CallLog {
    times: Vec<DateTime<Utc>>,
    longest_window: chrono::Duration,
}

impl CallLog {
    fn count_in(&self, window: chrono::Duration, now: DateTime<Utc>) -> usize {
        let start = window_start(now, window);
        self.times.iter().filter(|t| **t > start && **t <= now).count()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = window_start(now, self.longest_window);
        self.times.retain(|t| *t > horizon);
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    lineages: HashMap<String, CallLog>,
    since_sweep: u32,
}

impl LimiterState {
    fn sweep(&mut self, now: DateTime<Utc>) {
        let before = self.lineages.len();
        self.lineages.retain(|_, log| {
            log.prune(now);
            !log.times.is_empty()
        });
        self.since_sweep = 0;
        debug!(
            dropped = before - self.lineages.len(),
            remaining = self.lineages.len(),
            "rate limiter swept idle lineages"
        );
    }
}

/// Keeps call timestamps per lineage and counts those inside a window.
///
/// A lineage's timestamps are kept only as long as its longest rate-limit
/// window. Lineages with nothing left inside that window are dropped on a
/// periodic sweep, so memory follows the lineages active right now.
#[derive(Debug, Default)]
pub struct SlidingWindowRateLimiter {
    state: Mutex<LimiterState>,
}

impl SlidingWindowRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every lineage with no call left inside its longest window.
    pub fn sweep(&self, now: DateTime<Utc>) {
        self.lock().sweep(now);
    }

    /// Number of lineages with retained call history.
    pub fn tracked_lineages(&self) -> usize {
        self.lock().lineages.len()
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RateLimiter for SlidingWindowRateLimiter {
    fn calls_in_window(&self, lineage_id: &str, window: Duration, now: DateTime<Utc>) -> u32 {
        let count = self
            .lock()
            .lineages
            .get(lineage_id)
            .map(|log| log.count_in(to_chrono(window), now))
            .unwrap_or(0);
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    fn try_acquire(
        &self,
        lineage_id: &str,
        limits: &[(u32, Duration)],
        now: DateTime<Utc>,
    ) -> Result<(), usize> {
        let mut state = self.lock();

        state.since_sweep += 1;
        if state.since_sweep >= SWEEP_INTERVAL {
            state.sweep(now);
        }

        let log = state.lineages.get(lineage_id);
        for (position, (max_calls, window)) in limits.iter().enumerate() {
            let prior = log.map(|log| log.count_in(to_chrono(*window), now)).unwrap_or(0);
            if prior >= *max_calls as usize {
                return Err(position);
            }
        }

        let longest = limits
            .iter()
            .map(|(_, window)| to_chrono(*window))
            .max()
            .unwrap_or_else(chrono::Duration::zero);
        let log = state.lineages.entry(lineage_id.to_string()).or_insert_with(|| CallLog {
            times: Vec::new(),
            longest_window: longest,
        });
        log.longest_window = log.longest_window.max(longest);
        log.prune(now);
        log.times.push(now);
        Ok(())
    }
}

fn window_start(now: DateTime<Utc>, window: chrono::Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Out-of-range durations saturate at a century.
fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
