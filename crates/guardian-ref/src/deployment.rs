//! A fully wired, single-process Guardian deployment.
//!
//! Every collaborator is constructed here and injected; nothing is global.
//! Time is a `ManualClock` so scenarios can step past expiries and
//! cooldowns deterministically.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use guardian_audit::InMemoryAuditTrail;
use guardian_contracts::{
    error::GuardianResult,
    token::{CapabilityToken, Caveat, Tier},
    validation::{ActionDescriptor, Context, ValidationDecision},
};
use guardian_core::{
    clock::{Clock, ManualClock},
    kill_switch::AtomicKillSwitch,
    traits::{AuditTrail, PolicyCheck},
    AuditQueue, GuardianGateway,
};
use guardian_engine::{EngineConfig, GuardianEngine};
use guardian_token::{CaveatVerifier, InMemoryUsageCounter, RotatingKeyProvider, SlidingWindowRateLimiter, TokenChain};

use crate::scenarios::ScenarioOutcome;

/// The reference engine policy shipped with this crate.
pub const REFERENCE_POLICY: &str = include_str!("../policies/guardian.toml");

/// Root key for epoch 1. Reference only; real keys come from a key store.
const REFERENCE_ROOT_KEY: &[u8] = b"guardian-reference-root-key-epoch-1";

pub struct Deployment {
    pub gateway: GuardianGateway,
    pub tokens: Arc<TokenChain>,
    pub keys: Arc<RotatingKeyProvider>,
    pub engine: Arc<GuardianEngine>,
    pub trail: Arc<InMemoryAuditTrail>,
    pub clock: Arc<ManualClock>,
    pub kill_switch: Arc<AtomicKillSwitch>,
}

impl Deployment {
    /// Wire a deployment around `config` and `checks`.
    ///
    /// Must be called inside a Tokio runtime: the audit queue spawns its
    /// writer task here.
    pub fn new(config: EngineConfig, checks: Vec<Arc<dyn PolicyCheck>>) -> GuardianResult<Self> {
        let clock = Arc::new(ManualClock::starting_now());
        let kill_switch = Arc::new(AtomicKillSwitch::new());

        let keys = Arc::new(RotatingKeyProvider::new(REFERENCE_ROOT_KEY.to_vec()));
        let tokens = Arc::new(TokenChain::new(
            keys.clone(),
            CaveatVerifier::new(
                Arc::new(InMemoryUsageCounter::new()),
                Arc::new(SlidingWindowRateLimiter::new()),
            ),
        ));

        let engine = Arc::new(
            checks
                .into_iter()
                .fold(GuardianEngine::builder(config), |b, check| b.check(check))
                .kill_switch(kill_switch.clone())
                .clock(clock.clone())
                .build()?,
        );

        let trail = Arc::new(InMemoryAuditTrail::with_default_redactor().with_clock(clock.clone()));
        let audit = AuditQueue::spawn(trail.clone() as Arc<dyn AuditTrail>);
        let gateway = GuardianGateway::new(tokens.clone(), engine.clone(), audit, clock.clone());
        info!(
            policy_version = %engine.config().policy_version,
            enforcement = engine.config().enforcement.enabled,
            "reference deployment wired"
        );

        Ok(Self {
            gateway,
            tokens,
            keys,
            engine,
            trail,
            clock,
            kill_switch,
        })
    }

    /// A deployment running the shipped reference policy.
    pub fn with_reference_policy(checks: Vec<Arc<dyn PolicyCheck>>) -> GuardianResult<Self> {
        Self::new(EngineConfig::from_toml_str(REFERENCE_POLICY)?, checks)
    }

    /// Mint a root token for `subject`.
    pub fn mint(&self, subject: &str, tier: Tier, scopes: &[&str], caveats: Vec<Caveat>) -> GuardianResult<CapabilityToken> {
        Ok(self.tokens.mint_root(subject, tier, scope_set(scopes), caveats)?)
    }

    /// Present `token` through the gateway.
    pub async fn present(&self, token: &CapabilityToken, action: ActionDescriptor) -> ValidationDecision {
        self.gateway.handle(&token.to_bytes(), action).await
    }

    /// Wait until every decision so far is in the audit trail.
    pub async fn settle_audit(&self) {
        self.gateway.flush_audit().await;
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Flush the audit queue, seal the log, and verify the chain.
    pub async fn conclude(&self, decisions: Vec<ValidationDecision>) -> ScenarioOutcome {
        self.settle_audit().await;
        let chain_intact = self.trail.verify_chain();
        println!(
            "  Audit: {} records, chain {}",
            self.trail.len(),
            if chain_intact { "intact" } else { "BROKEN" }
        );
        ScenarioOutcome {
            decisions,
            audit: self.trail.export_log(),
            chain_intact,
        }
    }
}

pub fn scope_set(scopes: &[&str]) -> BTreeSet<String> {
    scopes.iter().map(|s| s.to_string()).collect()
}

/// Build a request context from key/value pairs.
pub fn context(pairs: &[(&str, serde_json::Value)]) -> Context {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Build an action descriptor requiring `scopes` and running `checks`.
pub fn action(
    action: &str,
    resource: &str,
    scopes: &[&str],
    checks: &[&str],
    context: Context,
) -> ActionDescriptor {
    ActionDescriptor {
        action: action.to_string(),
        resource: resource.to_string(),
        required_scopes: scope_set(scopes),
        min_tier: None,
        required_checks: checks.iter().map(|c| c.to_string()).collect(),
        context,
        deadline_ms: None,
    }
}

/// One-line rendering of a decision for scenario output.
pub fn describe(decision: &ValidationDecision) -> String {
    let verdict = if decision.allowed { "ALLOW" } else { "DENY" };
    format!(
        "{} risk={:.2} run={:?} skipped={:?} reasons={:?}{}",
        verdict,
        decision.risk_final,
        decision.run_names(),
        decision.skipped_names(),
        decision.reasons,
        if decision.emergency_override { " [EMERGENCY]" } else { "" },
    )
}
