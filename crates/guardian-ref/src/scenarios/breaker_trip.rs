//! Scenario 2: Breaker Trip
//!
//! `consent` always passes; `ethics` is down for its first five invocations
//! and healthy afterwards.
//!
//! Requests 1–5: ethics errors, each a breaker failure           → Deny (ethics:check_error)
//! Requests 6–7: ethics breaker OPEN, check skipped uninvoked    → Allow (circuit_open risk 0.0)
//! Request 8   : cooldown elapsed, one half-open trial succeeds  → Allow, breaker CLOSED
//!
//! Requests 6–7 show the fail-open-for-availability knob: with
//! `circuit_open_risk = 0.0` an open breaker trusts the remaining checks.

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use guardian_contracts::{error::GuardianResult, token::Tier};
use guardian_core::traits::PolicyCheck;

use crate::{
    checks::{ConsentCheck, ScriptedCheck},
    deployment::{action, context, describe, Deployment},
    scenarios::ScenarioOutcome,
};

/// Run Scenario 2: Breaker Trip.
pub async fn run_scenario() -> GuardianResult<ScenarioOutcome> {
    println!("=== Scenario 2: Breaker Trip ===");
    println!();

    let ethics = Arc::new(ScriptedCheck::failing_then_passing("ethics", 5));
    let checks: Vec<Arc<dyn PolicyCheck>> = vec![Arc::new(ConsentCheck::new()), ethics.clone()];
    let deployment = Deployment::with_reference_policy(checks)?;
    let cooldown = deployment.engine.config().breaker_for("ethics").cooldown_secs;

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
    for n in 1..=7 {
        let decision = deployment.present(&token, request()).await;
        println!("  Request {}: {}", n, describe(&decision));
        decisions.push(decision);
    }
    println!("  ethics invoked {} times for 7 requests", ethics.calls());

    println!();
    println!("  Clock advanced {}s (breaker cooldown)", cooldown);
    deployment.clock.advance(Duration::seconds(cooldown as i64));

    let decision = deployment.present(&token, request()).await;
    println!("  Request 8: {}", describe(&decision));
    decisions.push(decision);

    for snapshot in deployment.engine.breaker_snapshots() {
        println!(
            "  Breaker {:<8} state={:?} failures={} successes={}",
            snapshot.check_name, snapshot.state, snapshot.failure_count, snapshot.success_count
        );
    }

    println!();
    Ok(deployment.conclude(decisions).await)
}
