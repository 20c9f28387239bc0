//! Breaker-guarded, fail-closed policy validation.
//!
//! `GuardianEngine` implements `ActionValidator` from guardian-core.
//!
//! Evaluation algorithm:
//!
//! 1. Kill switch engaged → deny with `emergency_kill_switch`. Nothing else is
//!    read or touched.
//! 2. Enforcement disabled → allow with `enforcement_disabled`, loudly.
//! 3. For each required check, in request order:
//!    a. opted out by the caller → skipped (`opted_out`);
//!    b. not registered → failing result (`check_not_registered`);
//!    c. breaker rejects → skipped (`circuit_open`), contributing
//!       `circuit_open_risk`;
//!    d. otherwise spawned on its own task under the check's timeout.
//! 4. Await every spawned check, concurrently, up to the caller's budget.
//!    Checks still running when the budget expires are abandoned and
//!    recorded as skipped (`deadline_exceeded`) with risk 1.0.
//! 5. `risk_final` is the worst risk seen; `allowed = risk_final < threshold`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{error::Elapsed, Instant};
use tracing::{debug, warn};

use guardian_contracts::{
    breaker::CircuitBreakerState,
    error::{CheckError, GuardianError, GuardianResult},
    validation::{PolicyCheckResult, SkipReason, SkippedCheck, ValidationDecision, ValidationRequest},
};
use guardian_core::{
    clock::{Clock, SystemClock},
    kill_switch::AtomicKillSwitch,
    traits::{ActionValidator, KillSwitch, PolicyCheck},
};

use crate::breaker::{BreakerPermit, CircuitBreaker};
use crate::config::{EnforcementPolicy, EngineConfig};

/// Deny reason when the kill switch is engaged.
pub const REASON_KILL_SWITCH: &str = "emergency_kill_switch";
/// Allow reason when enforcement is disabled.
pub const REASON_ENFORCEMENT_DISABLED: &str = "enforcement_disabled";

type CheckOutput = Result<Result<PolicyCheckResult, CheckError>, Elapsed>;

/// How one spawned check ended, from the engine's point of view.
enum Outcome {
    Completed(PolicyCheckResult),
    Errored(String),
    TimedOut,
    Abandoned,
}

/// One required check's contribution to the decision.
enum Slot {
    Ran(PolicyCheckResult),
    Skipped(SkipReason),
}

/// The policy engine. Construct with [`GuardianEngine::builder`].
pub struct GuardianEngine {
    config: EngineConfig,
    checks: BTreeMap<String, Arc<dyn PolicyCheck>>,
    breakers: BTreeMap<String, CircuitBreaker>,
    kill_switch: Arc<dyn KillSwitch>,
}

impl GuardianEngine {
    pub fn builder(config: EngineConfig) -> GuardianEngineBuilder {
        GuardianEngineBuilder {
            config,
            checks: Vec::new(),
            kill_switch: None,
            clock: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate with an overall budget. Equivalent to
    /// `validate_action(request, Some(budget))`.
    pub async fn validate_action_within(&self, request: ValidationRequest, budget: Duration) -> ValidationDecision {
        ActionValidator::validate_action(self, request, Some(budget)).await
    }

    /// Current state of every registered check's breaker, by check name.
    pub fn breaker_snapshots(&self) -> Vec<CircuitBreakerState> {
        self.breakers.values().map(CircuitBreaker::snapshot).collect()
    }

    async fn evaluate(&self, request: ValidationRequest, budget: Option<Duration>) -> ValidationDecision {
        let deadline = budget.map(|b| Instant::now() + b);
        let request = Arc::new(request);
        let mut slots: Vec<Slot> = Vec::with_capacity(request.required_checks.len());
        let mut pending = Vec::new();

        // ── Step 3: admission ────────────────────────────────────────────────
        for (index, name) in request.required_checks.iter().enumerate() {
            if request.is_opted_out(name) {
                debug!(request_id = %request.request_id, check = %name, "check opted out");
                slots.push(Slot::Skipped(SkipReason::OptedOut));
                continue;
            }

            let (Some(check), Some(breaker)) = (self.checks.get(name), self.breakers.get(name)) else {
                warn!(request_id = %request.request_id, check = %name, "required check is not registered");
                slots.push(Slot::Ran(PolicyCheckResult::fail_closed(name.as_str(), "check_not_registered")));
                continue;
            };

            let Some(permit) = breaker.try_acquire() else {
                debug!(request_id = %request.request_id, check = %name, "breaker open; check skipped");
                slots.push(Slot::Skipped(SkipReason::CircuitOpen));
                continue;
            };

            let handle = spawn_check(Arc::clone(check), Arc::clone(&request), self.config.check_timeout(name));
            pending.push((index, name.clone(), handle, permit));
            // Fail-closed placeholder until the check settles.
            slots.push(Slot::Skipped(SkipReason::DeadlineExceeded));
        }

        // ── Step 4: collect ──────────────────────────────────────────────────
        let waits = pending.into_iter().map(|(index, name, handle, permit)| async move {
            let outcome = await_check(handle, deadline).await;
            (index, name, permit, outcome)
        });
        for (index, name, permit, outcome) in join_all(waits).await {
            slots[index] = settle(&request.request_id, &name, permit, outcome);
        }

        // ── Step 5: aggregate ────────────────────────────────────────────────
        let mut risk_final: f64 = 0.0;
        let mut reasons = Vec::new();
        let mut checks_run = Vec::new();
        let mut checks_skipped = Vec::new();

        for (name, slot) in request.required_checks.iter().zip(slots) {
            match slot {
                Slot::Ran(result) => {
                    if result.risk_score > 0.0 {
                        reasons.push(format!("{}:{}", name, result.reason));
                    }
                    risk_final = risk_final.max(result.risk_score);
                    checks_run.push(result);
                }
                Slot::Skipped(reason) => {
                    reasons.push(format!("{}:{}", reason.as_str(), name));
                    risk_final = risk_final.max(self.skip_penalty(reason));
                    checks_skipped.push(SkippedCheck {
                        check_name: name.clone(),
                        reason,
                    });
                }
            }
        }

        let allowed = risk_final < self.config.decision_threshold;
        let decision = ValidationDecision {
            request_id: request.request_id.clone(),
            allowed,
            risk_final,
            reasons,
            checks_run,
            checks_skipped,
            emergency_override: false,
            policy_version: self.config.policy_version.clone(),
        };

        if allowed {
            debug!(request_id = %decision.request_id, risk_final, "request allowed");
        } else {
            warn!(
                request_id = %decision.request_id,
                risk_final,
                reasons = ?decision.reasons,
                "request denied"
            );
        }
        decision
    }

    fn skip_penalty(&self, reason: SkipReason) -> f64 {
        match reason {
            SkipReason::OptedOut => 0.0,
            SkipReason::CircuitOpen => self.config.circuit_open_risk,
            SkipReason::DeadlineExceeded => 1.0,
        }
    }
}

#[async_trait]
impl ActionValidator for GuardianEngine {
    async fn validate_action(&self, request: ValidationRequest, budget: Option<Duration>) -> ValidationDecision {
        // ── Step 1: emergency kill switch ────────────────────────────────────
        if self.kill_switch.is_engaged() {
            warn!(request_id = %request.request_id, "kill switch engaged; denying");
            return ValidationDecision {
                emergency_override: true,
                ..ValidationDecision::denied(
                    request.request_id,
                    self.config.policy_version.clone(),
                    vec![REASON_KILL_SWITCH.to_string()],
                )
            };
        }

        // ── Step 2: enforcement toggle ───────────────────────────────────────
        if !self.config.enforcement.enabled {
            warn!(
                request_id = %request.request_id,
                action = %request.action,
                "ENFORCEMENT DISABLED: allowing without running checks"
            );
            return ValidationDecision {
                request_id: request.request_id,
                allowed: true,
                risk_final: 0.0,
                reasons: vec![REASON_ENFORCEMENT_DISABLED.to_string()],
                checks_run: Vec::new(),
                checks_skipped: Vec::new(),
                emergency_override: false,
                policy_version: self.config.policy_version.clone(),
            };
        }

        self.evaluate(request, budget).await
    }

    fn policy_version(&self) -> &str {
        &self.config.policy_version
    }
}

fn spawn_check(
    check: Arc<dyn PolicyCheck>,
    request: Arc<ValidationRequest>,
    timeout: Duration,
) -> JoinHandle<CheckOutput> {
    tokio::spawn(async move { tokio::time::timeout(timeout, check.run(&request)).await })
}

async fn await_check(mut handle: JoinHandle<CheckOutput>, deadline: Option<Instant>) -> Outcome {
    let joined = match deadline {
        Some(at) => match tokio::time::timeout_at(at, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                return Outcome::Abandoned;
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(Ok(Ok(result))) => Outcome::Completed(result),
        Ok(Ok(Err(e))) => Outcome::Errored(e.to_string()),
        Ok(Err(_elapsed)) => Outcome::TimedOut,
        // The check panicked or its task was cancelled.
        Err(join_error) => Outcome::Errored(join_error.to_string()),
    }
}

/// Settle the breaker permit and turn the outcome into a slot.
fn settle(request_id: &str, name: &str, permit: BreakerPermit<'_>, outcome: Outcome) -> Slot {
    match outcome {
        Outcome::Completed(result) => {
            permit.succeed();
            Slot::Ran(normalize(name, result))
        }
        Outcome::Errored(cause) => {
            permit.fail();
            let err = GuardianError::CheckFailure {
                check_name: name.to_string(),
                cause,
            };
            warn!(request_id = %request_id, check = %name, error = %err, "check errored");
            Slot::Ran(PolicyCheckResult::fail_closed(name, "check_error").with_evidence(json!({ "error": err.to_string() })))
        }
        Outcome::TimedOut => {
            permit.fail();
            let err = GuardianError::DeadlineExceeded {
                check_name: name.to_string(),
            };
            warn!(request_id = %request_id, check = %name, error = %err, "check timed out");
            Slot::Ran(PolicyCheckResult::fail_closed(name, "deadline_exceeded").with_evidence(json!({ "error": err.to_string() })))
        }
        Outcome::Abandoned => {
            drop(permit);
            warn!(request_id = %request_id, check = %name, "request budget expired; check abandoned");
            Slot::Skipped(SkipReason::DeadlineExceeded)
        }
    }
}

/// Pin the result to its registered name and clamp risk into `[0, 1]`.
/// A NaN risk is treated as maximal.
fn normalize(name: &str, mut result: PolicyCheckResult) -> PolicyCheckResult {
    result.check_name = name.to_string();
    result.risk_score = if result.risk_score.is_nan() {
        1.0
    } else {
        result.risk_score.clamp(0.0, 1.0)
    };
    result
}

/// Registers checks and collaborators, then validates the configuration.
pub struct GuardianEngineBuilder {
    config: EngineConfig,
    checks: Vec<Arc<dyn PolicyCheck>>,
    kill_switch: Option<Arc<dyn KillSwitch>>,
    clock: Option<Arc<dyn Clock>>,
}

impl GuardianEngineBuilder {
    /// Register a check under its `name()`. A later registration with the
    /// same name replaces the earlier one.
    pub fn check(mut self, check: Arc<dyn PolicyCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Defaults to a released `AtomicKillSwitch`.
    pub fn kill_switch(mut self, kill_switch: Arc<dyn KillSwitch>) -> Self {
        self.kill_switch = Some(kill_switch);
        self
    }

    /// Clock used by the breakers. Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn enforcement(mut self, enforcement: EnforcementPolicy) -> Self {
        self.config.enforcement = enforcement;
        self
    }

    /// Returns `GuardianError::ConfigError` if the configuration is invalid.
    pub fn build(self) -> GuardianResult<GuardianEngine> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let mut checks = BTreeMap::new();
        let mut breakers = BTreeMap::new();
        for check in self.checks {
            let name = check.name().to_string();
            breakers.insert(
                name.clone(),
                CircuitBreaker::new(name.clone(), self.config.breaker_for(&name), Arc::clone(&clock)),
            );
            checks.insert(name, check);
        }

        if !self.config.enforcement.enabled {
            warn!(policy_version = %self.config.policy_version, "engine built with enforcement DISABLED");
        }
        let names: Vec<&String> = checks.keys().collect();
        debug!(
            policy_version = %self.config.policy_version,
            checks = ?names,
            "guardian engine built"
        );

        Ok(GuardianEngine {
            config: self.config,
            checks,
            breakers,
            kill_switch: self.kill_switch.unwrap_or_else(|| Arc::new(AtomicKillSwitch::new())),
        })
    }
}
