//! Reference scenarios.
//!
//! Each scenario wires a fresh `Deployment` with reference checks, drives a
//! short sequence of requests through the gateway, prints what happened, and
//! returns the decisions plus the sealed audit log.

use guardian_contracts::{audit::AuditLog, validation::ValidationDecision};

pub mod breaker_trip;
pub mod enforcement_disabled;
pub mod kill_switch;
pub mod token_lifecycle;

/// What a scenario produced.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    /// Gateway decisions, in request order.
    pub decisions: Vec<ValidationDecision>,
    /// The audit trail after every decision was written.
    pub audit: AuditLog,
    /// Whether the audit chain verified at the end of the scenario.
    pub chain_intact: bool,
}
