//! Scenario 4: Kill Switch
//!
//! An operator engages the emergency kill switch mid-session:
//!
//! Request 1: switch released                  → Allow
//! Request 2: switch engaged                   → Deny (emergency_kill_switch), no checks run
//! Request 3: switch released again            → Allow
//!
//! The kill switch is consulted before enforcement and before any breaker,
//! so request 2 invokes nothing.

use std::sync::Arc;

use serde_json::json;

use guardian_contracts::{error::GuardianResult, token::Tier};
use guardian_core::traits::PolicyCheck;

use crate::{
    checks::{ConsentCheck, ScriptedCheck},
    deployment::{action, context, describe, Deployment},
    scenarios::ScenarioOutcome,
};

/// Run Scenario 4: Kill Switch.
pub async fn run_scenario() -> GuardianResult<ScenarioOutcome> {
    println!("=== Scenario 4: Kill Switch ===");
    println!();

    let ethics = Arc::new(ScriptedCheck::new("ethics", vec![]));
    let checks: Vec<Arc<dyn PolicyCheck>> = vec![Arc::new(ConsentCheck::new()), ethics.clone()];
    let deployment = Deployment::with_reference_policy(checks)?;

    let token = deployment.mint("agent-7", Tier::Authenticated, &["memory:read"], vec![])?;
    let request = || {
        action(
            "memory.read",
            "memory/user-42/notes",
            &["memory:read"],
            &["consent", "ethics"],
            context(&[("consent", json!(true))]),
        )
    };

    let mut decisions = Vec::new();

    println!("  Request 1: kill switch released");
    let first = deployment.present(&token, request()).await;
    println!("    {}", describe(&first));
    decisions.push(first);

    println!("  Request 2: kill switch engaged");
    deployment.kill_switch.engage();
    let calls_before = ethics.calls();
    let second = deployment.present(&token, request()).await;
    println!("    {}", describe(&second));
    println!("    ethics invocations during override: {}", ethics.calls() - calls_before);
    decisions.push(second);

    println!("  Request 3: kill switch released");
    deployment.kill_switch.release();
    let third = deployment.present(&token, request()).await;
    println!("    {}", describe(&third));
    decisions.push(third);

    println!();
    Ok(deployment.conclude(decisions).await)
}

#[cfg(test)]
mod tests {
    use guardian_engine::REASON_KILL_SWITCH;

    use super::*;

    #[tokio::test]
    async fn test_kill_switch_overrides_only_while_engaged() {
        let outcome = run_scenario().await.unwrap();
        let [first, second, third] = outcome.decisions.as_slice() else {
            panic!("expected three decisions");
        };

        assert!(first.allowed);
        assert!(!first.emergency_override);

        assert!(!second.allowed);
        assert!(second.emergency_override);
        assert_eq!(second.reasons, vec![REASON_KILL_SWITCH]);
        assert!(second.checks_run.is_empty());
        assert!(second.checks_skipped.is_empty());

        assert!(third.allowed);
        assert!(!third.emergency_override);

        assert!(outcome.chain_intact);
        assert_eq!(outcome.audit.records.len(), 3);
    }
}
