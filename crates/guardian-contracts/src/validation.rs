//! Validation request and decision types.
//!
//! The gateway turns a verified token plus an `ActionDescriptor` into a
//! `ValidationRequest`; the engine turns the request into a
//! `ValidationDecision`. Decisions are immutable once produced and are
//! appended verbatim (after redaction) to the audit trail.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::token::Tier;

/// Free-form request context. A `BTreeMap` keeps serialization canonical.
pub type Context = BTreeMap<String, serde_json::Value>;

/// What a calling service asks the gateway to authorize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// The operation being attempted (e.g. "memory.write").
    pub action: String,
    /// The resource the operation targets (e.g. "memory/user-42/notes").
    pub resource: String,
    /// Scopes the token must hold for this action.
    #[serde(default)]
    pub required_scopes: BTreeSet<String>,
    /// Minimum tier the token must carry, if any.
    #[serde(default)]
    pub min_tier: Option<Tier>,
    /// Policy checks to run, in order.
    #[serde(default)]
    pub required_checks: Vec<String>,
    /// Raw, unredacted context handed to checks and (redacted) to the audit trail.
    #[serde(default)]
    pub context: Context,
    /// Overall validation budget for this request, in milliseconds.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

/// Everything the engine needs to validate one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// The principal the presented token speaks for.
    pub subject: String,
    pub tier: Tier,
    pub action: String,
    pub resource: String,
    /// `token.scopes ∩ action.required_scopes`.
    pub granted_scopes: BTreeSet<String>,
    pub context: Context,
    /// Check names to run, in order.
    pub required_checks: Vec<String>,
    /// Checks a trusted internal caller has opted out of. The gateway never
    /// populates this.
    #[serde(default)]
    pub opted_out: BTreeSet<String>,
}

impl ValidationRequest {
    /// A request with a fresh id and the current time; no checks, no context.
    pub fn new(
        subject: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            subject: subject.into(),
            tier: Tier::Public,
            action: action.into(),
            resource: resource.into(),
            granted_scopes: BTreeSet::new(),
            context: Context::new(),
            required_checks: Vec::new(),
            opted_out: BTreeSet::new(),
        }
    }

    /// Replace the ordered list of required checks.
    pub fn with_checks<I, S>(mut self, checks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_checks = checks.into_iter().map(Into::into).collect();
        self
    }

    /// Insert one context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Opt a check out of this request (e.g. `require_consent = false`).
    pub fn opt_out(mut self, check: impl Into<String>) -> Self {
        self.opted_out.insert(check.into());
        self
    }

    /// Return true if `check` was opted out by the caller.
    pub fn is_opted_out(&self, check: &str) -> bool {
        self.opted_out.contains(check)
    }
}

/// The outcome of running one policy check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyCheckResult {
    pub check_name: String,
    pub passed: bool,
    /// Risk in `[0, 1]`. Zero means the check found nothing of concern.
    pub risk_score: f64,
    pub reason: String,
    #[serde(default)]
    pub evidence: serde_json::Value,
}

impl PolicyCheckResult {
    /// A passing, zero-risk result.
    pub fn pass(check_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            check_name: check_name.into(),
            passed: true,
            risk_score: 0.0,
            reason: reason.into(),
            evidence: serde_json::Value::Null,
        }
    }

    /// A failing, maximum-risk result. Used for errors, timeouts, and
    /// unregistered checks.
    pub fn fail_closed(check_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            check_name: check_name.into(),
            passed: false,
            risk_score: 1.0,
            reason: reason.into(),
            evidence: serde_json::Value::Null,
        }
    }

    /// Attach evidence to the result.
    pub fn with_evidence(mut self, evidence: serde_json::Value) -> Self {
        self.evidence = evidence;
        self
    }
}

/// Why a required check did not contribute a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The check's breaker was open.
    CircuitOpen,
    /// A trusted internal caller opted the check out.
    OptedOut,
    /// The caller's overall deadline expired before the check finished.
    DeadlineExceeded,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::CircuitOpen => "circuit_open",
            SkipReason::OptedOut => "opted_out",
            SkipReason::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

/// A required check that was skipped, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCheck {
    pub check_name: String,
    pub reason: SkipReason,
}

/// The engine's verdict on one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDecision {
    pub request_id: String,
    pub allowed: bool,
    /// Worst-check-wins aggregate risk in `[0, 1]`.
    pub risk_final: f64,
    pub reasons: Vec<String>,
    pub checks_run: Vec<PolicyCheckResult>,
    pub checks_skipped: Vec<SkippedCheck>,
    pub emergency_override: bool,
    pub policy_version: String,
}

impl ValidationDecision {
    /// A deny decision that ran no checks.
    pub fn denied(
        request_id: impl Into<String>,
        policy_version: impl Into<String>,
        reasons: Vec<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            allowed: false,
            risk_final: 1.0,
            reasons,
            checks_run: Vec::new(),
            checks_skipped: Vec::new(),
            emergency_override: false,
            policy_version: policy_version.into(),
        }
    }

    /// Names of the checks that produced a result, in request order.
    pub fn run_names(&self) -> Vec<&str> {
        self.checks_run.iter().map(|r| r.check_name.as_str()).collect()
    }

    /// Names of the checks that were skipped, in request order.
    pub fn skipped_names(&self) -> Vec<&str> {
        self.checks_skipped.iter().map(|s| s.check_name.as_str()).collect()
    }
}
