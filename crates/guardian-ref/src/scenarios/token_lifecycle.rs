//! Scenario 1: Token Lifecycle
//!
//! A root token is attenuated into a short-lived, read-only child and
//! presented through the gateway:
//!
//! Step A: child within its expiry, holding the needed scope → Allow
//! Step B: child asks for a scope it was never given          → Deny (scope_missing)
//! Step C: clock advanced 61s past the child's 60s expiry     → Deny (caveat:expiry)
//! Step D: signing key rotated; old root presented            → Deny (signature_invalid)
//!
//! An attempt to re-widen the child is refused before it ever reaches the
//! gateway.

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use guardian_contracts::{
    error::GuardianResult,
    token::{Caveat, Tier},
};
use guardian_core::traits::PolicyCheck;

use crate::{
    checks::{ConsentCheck, EthicsCheck},
    deployment::{action, context, describe, scope_set, Deployment},
    scenarios::ScenarioOutcome,
};

/// Run Scenario 1: Token Lifecycle.
pub async fn run_scenario() -> GuardianResult<ScenarioOutcome> {
    println!("=== Scenario 1: Token Lifecycle ===");
    println!();

    let checks: Vec<Arc<dyn PolicyCheck>> = vec![
        Arc::new(ConsentCheck::new()),
        Arc::new(EthicsCheck::with_default_terms()),
    ];
    let deployment = Deployment::with_reference_policy(checks)?;

    let root = deployment.mint("agent-7", Tier::Elevated, &["memory:read", "memory:write"], vec![])?;
    println!("  Root token {} scopes={:?}", root.token_id, root.scopes);

    let expiry = deployment.now() + Duration::seconds(60);
    let child = deployment.tokens.attenuate(
        &root,
        scope_set(&["memory:read"]),
        vec![Caveat::Expiry { not_after: expiry }],
    )?;
    println!("  Child token {} scopes={:?} expires={}", child.token_id, child.scopes, expiry);

    match deployment.tokens.attenuate(&child, scope_set(&["memory:read", "memory:write"]), child.caveats.clone()) {
        Ok(_) => println!("  [UNEXPECTED] re-widened child was minted"),
        Err(e) => println!("  Re-widening refused: {}", e),
    }
    println!();

    let read = |ctx| action("memory.read", "memory/user-42/notes", &["memory:read"], &["consent", "ethics"], ctx);
    let consented = || context(&[("consent", json!(true)), ("prompt", json!("summarize my notes"))]);

    let mut decisions = Vec::new();

    println!("  Step A: child presented for memory.read");
    let a = deployment.present(&child, read(consented())).await;
    println!("    {}", describe(&a));
    decisions.push(a);

    println!("  Step B: child presented for memory.write");
    let write = action("memory.write", "memory/user-42/notes", &["memory:write"], &["consent"], consented());
    let b = deployment.present(&child, write).await;
    println!("    {}", describe(&b));
    decisions.push(b);

    println!("  Step C: clock advanced 61s, child presented again");
    deployment.clock.advance(Duration::seconds(61));
    let c = deployment.present(&child, read(consented())).await;
    println!("    {}", describe(&c));
    decisions.push(c);

    println!("  Step D: signing key rotated, root presented");
    let epoch = deployment.keys.rotate(b"guardian-reference-root-key-epoch-2".to_vec());
    println!("    now signing under epoch {}", epoch);
    let d = deployment.present(&root, read(consented())).await;
    println!("    {}", describe(&d));
    decisions.push(d);

    println!();
    Ok(deployment.conclude(decisions).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_lifecycle_outcomes() {
        let outcome = run_scenario().await.unwrap();
        let [a, b, c, d] = outcome.decisions.as_slice() else {
            panic!("expected four decisions, got {}", outcome.decisions.len());
        };

        assert!(a.allowed, "step A should be allowed: {:?}", a.reasons);
        assert_eq!(a.run_names(), vec!["consent", "ethics"]);

        assert!(!b.allowed);
        assert_eq!(b.reasons, vec!["scope_missing:memory:write"]);
        assert!(b.checks_run.is_empty());

        assert!(!c.allowed);
        assert_eq!(c.reasons, vec!["token_invalid:caveat_violation", "caveat:expiry"]);

        assert!(!d.allowed);
        assert_eq!(d.reasons, vec!["token_invalid:signature_invalid"]);
    }

    /// Pre-engine denials are audited alongside allowed decisions.
    #[tokio::test]
    async fn test_token_lifecycle_audits_every_decision() {
        let outcome = run_scenario().await.unwrap();
        assert!(outcome.chain_intact);
        assert_eq!(outcome.audit.records.len(), 4);

        let audited: Vec<bool> = outcome.audit.records.iter().map(|r| r.decision.allowed).collect();
        assert_eq!(audited, vec![true, false, false, false]);
    }
}
