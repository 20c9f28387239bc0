//! Reference policy checks.
//!
//! These are deliberately simple stand-ins for real consent, ethics and drift
//! services. They read only the request and its context, and are safe to
//! call concurrently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use guardian_contracts::{
    error::CheckError,
    validation::{PolicyCheckResult, ValidationRequest},
};
use guardian_core::traits::PolicyCheck;

// ── Consent ───────────────────────────────────────────────────────────────────

/// Passes only when the request context carries `consent = true`.
#[derive(Debug, Clone)]
pub struct ConsentCheck {
    context_key: String,
}

impl ConsentCheck {
    pub const NAME: &'static str = "consent";

    pub fn new() -> Self {
        Self::with_key("consent")
    }

    /// Read the consent flag from `key` instead of `"consent"`.
    pub fn with_key(key: impl Into<String>) -> Self {
        Self { context_key: key.into() }
    }
}

impl Default for ConsentCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyCheck for ConsentCheck {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, request: &ValidationRequest) -> Result<PolicyCheckResult, CheckError> {
        match request.context.get(&self.context_key) {
            Some(Value::Bool(true)) => Ok(PolicyCheckResult::pass(Self::NAME, "consent on record")),
            Some(Value::Bool(false)) => Ok(PolicyCheckResult::fail_closed(Self::NAME, "consent withdrawn")),
            None => Ok(PolicyCheckResult::fail_closed(Self::NAME, "no consent recorded")),
            Some(other) => Err(CheckError::Failed {
                reason: format!("'{}' must be a boolean, got {}", self.context_key, other),
            }),
        }
    }
}

// ── Ethics ────────────────────────────────────────────────────────────────────

/// Scores a request by the heaviest weighted term found in its action,
/// resource, or any string in its context.
#[derive(Debug, Clone, Default)]
pub struct EthicsCheck {
    terms: Vec<(String, f64)>,
}

impl EthicsCheck {
    pub const NAME: &'static str = "ethics";

    pub fn new() -> Self {
        Self::default()
    }

    /// Flag `term` (case-insensitive) with risk `weight`.
    pub fn term(mut self, term: &str, weight: f64) -> Self {
        self.terms.push((term.to_lowercase(), weight.clamp(0.0, 1.0)));
        self
    }

    /// A small default vocabulary: hard blocks at 1.0, soft flags below the
    /// default threshold.
    pub fn with_default_terms() -> Self {
        Self::new()
            .term("exfiltrate", 1.0)
            .term("self-harm", 1.0)
            .term("impersonate", 0.9)
            .term("bypass", 0.4)
    }
}

#[async_trait]
impl PolicyCheck for EthicsCheck {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, request: &ValidationRequest) -> Result<PolicyCheckResult, CheckError> {
        let mut haystack = format!("{} {}", request.action, request.resource).to_lowercase();
        for value in request.context.values() {
            collect_strings(value, &mut haystack);
        }

        let hits: Vec<&(String, f64)> = self.terms.iter().filter(|(t, _)| haystack.contains(t.as_str())).collect();
        let risk = hits.iter().map(|(_, w)| *w).fold(0.0, f64::max);
        if hits.is_empty() {
            return Ok(PolicyCheckResult::pass(Self::NAME, "no flagged terms"));
        }

        let matched: Vec<&str> = hits.iter().map(|(t, _)| t.as_str()).collect();
        Ok(PolicyCheckResult {
            check_name: Self::NAME.to_string(),
            passed: risk < 0.7,
            risk_score: risk,
            reason: format!("flagged terms: {}", matched.join(", ")),
            evidence: json!({ "terms": matched }),
        })
    }
}

fn collect_strings(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push(' ');
            out.push_str(&s.to_lowercase());
        }
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

// ── Drift ─────────────────────────────────────────────────────────────────────

/// Compares the context's numeric `drift_score` against a tolerance.
///
/// The score is the risk. A missing or non-numeric score is a check error,
/// which the engine turns into a failing result.
#[derive(Debug, Clone)]
pub struct DriftCheck {
    tolerance: f64,
}

impl DriftCheck {
    pub const NAME: &'static str = "drift";

    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

#[async_trait]
impl PolicyCheck for DriftCheck {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, request: &ValidationRequest) -> Result<PolicyCheckResult, CheckError> {
        let score = request
            .context
            .get("drift_score")
            .and_then(Value::as_f64)
            .ok_or_else(|| CheckError::Failed {
                reason: "context has no numeric drift_score".to_string(),
            })?;

        let within = score <= self.tolerance;
        Ok(PolicyCheckResult {
            check_name: Self::NAME.to_string(),
            passed: within,
            risk_score: score.clamp(0.0, 1.0),
            reason: if within {
                "within tolerance".to_string()
            } else {
                format!("drift {:.2} exceeds tolerance {:.2}", score, self.tolerance)
            },
            evidence: json!({ "drift_score": score, "tolerance": self.tolerance }),
        })
    }
}

// ── Scripted ──────────────────────────────────────────────────────────────────

/// One scripted response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Pass,
    Risk(f64),
    /// Return `CheckError::Unavailable`.
    Fail,
    /// Sleep for the given duration before passing.
    Delay(Duration),
}

/// A check that replays a fixed script, one step per invocation, repeating
/// the last step once the script runs out. Used for deterministic scenarios.
#[derive(Debug)]
pub struct ScriptedCheck {
    name: String,
    steps: Vec<Step>,
    calls: AtomicUsize,
}

impl ScriptedCheck {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
            calls: AtomicUsize::new(0),
        }
    }

    /// `times` failures, then passes forever.
    pub fn failing_then_passing(name: impl Into<String>, times: usize) -> Self {
        let mut steps = vec![Step::Fail; times];
        steps.push(Step::Pass);
        Self::new(name, steps)
    }

    /// Number of times the check has actually been invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyCheck for ScriptedCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _request: &ValidationRequest) -> Result<PolicyCheckResult, CheckError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.get(call).or(self.steps.last()).copied().unwrap_or(Step::Pass);

        match step {
            Step::Pass => Ok(PolicyCheckResult::pass(self.name.as_str(), "scripted pass")),
            Step::Risk(risk) => Ok(PolicyCheckResult {
                check_name: self.name.clone(),
                passed: risk < 0.7,
                risk_score: risk,
                reason: format!("scripted risk {risk}"),
                evidence: Value::Null,
            }),
            Step::Fail => Err(CheckError::Unavailable {
                reason: format!("{} scripted outage (call {})", self.name, call + 1),
            }),
            Step::Delay(d) => {
                tokio::time::sleep(d).await;
                Ok(PolicyCheckResult::pass(self.name.as_str(), "scripted pass after delay"))
            }
        }
    }
}
