//! Core trait definitions for the Guardian gateway.
//!
//! These traits define the trust boundary:
//!
//! - `PolicyCheck`       : pluggable, possibly slow, possibly failing check
//! - `TokenAuthority`    : trusted verifier of capability token lineages
//! - `ActionValidator`   : trusted, fail-closed aggregation of checks
//! - `AuditTrail`        : trusted append-only decision sink
//!
//! and the collaborators those components consume: signing keys, usage and
//! rate counters, the PII redactor, and the emergency kill switch. The
//! gateway wires them together; nothing here is a process-wide singleton.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use guardian_contracts::{
    audit::AuditRecord,
    error::{CheckError, GuardianResult, TokenInvalid},
    token::CapabilityToken,
    validation::{Context, PolicyCheckResult, ValidationDecision, ValidationRequest},
};

/// A named, opaque policy check (consent, ethics, drift, …).
///
/// Implementations are **untrusted** for availability: they may block, be
/// slow, or fail. The engine wraps every call in a circuit breaker and a
/// deadline, and converts any `Err` into a failing, maximum-risk result.
#[async_trait]
pub trait PolicyCheck: Send + Sync {
    /// The registration name requests refer to (e.g. `"consent"`).
    fn name(&self) -> &str;

    /// Evaluate the request. Must be safe to call concurrently.
    ///
    /// The engine abandons the call once its deadline passes; cancellation of
    /// the underlying work is best-effort.
    async fn run(&self, request: &ValidationRequest) -> Result<PolicyCheckResult, CheckError>;
}

/// Secret key material for one signing epoch.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(pub Vec<u8>);

impl SigningKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// Source of root signing keys, indexed by epoch.
///
/// Rotation retires an epoch by making `key_for` return `None`, which
/// invalidates every token rooted in that epoch on its next verification.
pub trait SigningKeyProvider: Send + Sync {
    /// The epoch new root tokens are minted under.
    fn current_epoch(&self) -> u64;

    /// The key for `epoch`, or `None` if the epoch is unknown or retired.
    fn key_for(&self, epoch: u64) -> Option<SigningKey>;
}

/// Per-lineage presentation counter backing `max_uses` caveats.
pub trait UsageCounter: Send + Sync {
    /// Number of presentations consumed by `lineage_id`.
    fn uses(&self, lineage_id: &str) -> u64;

    /// Consume one use if fewer than `limit` have been consumed, as a single
    /// atomic step. Returns `false`, consuming nothing, once `limit` is
    /// reached.
    fn try_consume(&self, lineage_id: &str, limit: u64) -> bool;

    /// Give back one use taken by `try_consume`.
    fn refund(&self, lineage_id: &str);
}

/// Sliding-window call counter backing `rate_limit` caveats.
pub trait RateLimiter: Send + Sync {
    /// Number of calls recorded for `lineage_id` in `(now - window, now]`.
    fn calls_in_window(&self, lineage_id: &str, window: Duration, now: DateTime<Utc>) -> u32;

    /// Record a call at `now` if every `(max_calls, window)` in `limits` has
    /// fewer than `max_calls` calls in `(now - window, now]`, as a single
    /// atomic step.
    ///
    /// On refusal nothing is recorded and the `Err` carries the position in
    /// `limits` of the first exhausted limit.
    fn try_acquire(&self, lineage_id: &str, limits: &[(u32, Duration)], now: DateTime<Utc>)
        -> Result<(), usize>;
}

/// PII redaction applied to everything before it reaches the audit trail.
///
/// Implementations must be idempotent and must not panic.
pub trait Redactor: Send + Sync {
    fn redact(&self, input: &str) -> String;
}

/// The out-of-band emergency stop.
///
/// Flipped by operational tooling, never by application code. Reads must be
/// O(1) and side-effect free.
pub trait KillSwitch: Send + Sync {
    fn is_engaged(&self) -> bool;
}

/// Request-side inputs a token's caveats are evaluated against.
#[derive(Debug, Clone)]
pub struct VerifyContext {
    pub resource: String,
    pub now: DateTime<Utc>,
}

/// Verifies capability tokens and records their accepted presentations.
pub trait TokenAuthority: Send + Sync {
    /// Recompute the token's MAC chain, check lineage monotonicity, then
    /// evaluate every caveat in array order.
    fn verify(&self, token: &CapabilityToken, ctx: &VerifyContext) -> Result<(), TokenInvalid>;

    /// Consume one presentation against the usage and rate counters the
    /// token's caveats reference, atomically per counter.
    ///
    /// `verify` only reads those counters, so concurrent presentations can
    /// all pass it; this is the step that holds `max_uses` and `rate_limit`.
    /// Fails with `CaveatViolation` once either is exhausted.
    fn consume(&self, token: &CapabilityToken, now: DateTime<Utc>) -> Result<(), TokenInvalid>;
}

/// The policy engine behind the gateway.
///
/// Implementations never fail: check errors, timeouts, and open breakers are
/// all folded into the returned decision.
#[async_trait]
pub trait ActionValidator: Send + Sync {
    /// Validate `request`. If `budget` is set, checks still running when it
    /// expires are abandoned and recorded as skipped.
    async fn validate_action(
        &self,
        request: ValidationRequest,
        budget: Option<Duration>,
    ) -> ValidationDecision;

    /// The policy version stamped on every decision.
    fn policy_version(&self) -> &str;
}

/// The append-only, hash-chained decision log.
pub trait AuditTrail: Send + Sync {
    /// Redact, hash, and append one decision with its raw request context.
    fn append(&self, decision: &ValidationDecision, raw_context: &Context)
        -> GuardianResult<AuditRecord>;

    /// Recompute every record hash and linkage. An empty trail is valid.
    fn verify_chain(&self) -> bool;
}
