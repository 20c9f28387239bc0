//! Circuit breaker state, as exported to operators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation; calls pass through.
    Closed,
    /// Fast-fail; calls are rejected without invoking the check.
    Open,
    /// Trial; a bounded number of calls may probe the check.
    HalfOpen,
}

/// A point-in-time copy of one check's breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub check_name: String,
    pub state: BreakerState,
    /// Failures inside the current rolling window.
    pub failure_count: u32,
    /// Successes since the last transition.
    pub success_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub open_until: Option<DateTime<Utc>>,
    pub half_open_trial_budget: u32,
}
