//! The Guardian gateway: the only call surface a calling service needs.
//!
//! The gateway enforces the trust order on every request:
//!
//!   Decode → Token chain → Scopes/Tier → [ActionValidator] → Audit (async)
//!
//! An invalid token never reaches the policy checks. This is enforced
//! structurally: the only call to `validate_action` sits after every token
//! gate has passed. Callers always receive a `ValidationDecision`; every
//! ambiguity resolves to `allowed = false`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use guardian_contracts::{
    error::TokenInvalid,
    token::CapabilityToken,
    validation::{ActionDescriptor, ValidationDecision, ValidationRequest},
};

use crate::{
    audit_queue::AuditQueue,
    clock::Clock,
    traits::{ActionValidator, TokenAuthority, VerifyContext},
};

/// Composition root wiring token verification, policy validation, and audit.
///
/// Construct one gateway per process and share it behind an `Arc`; it holds
/// no request-level lock.
pub struct GuardianGateway {
    tokens: Arc<dyn TokenAuthority>,
    validator: Arc<dyn ActionValidator>,
    audit: AuditQueue,
    clock: Arc<dyn Clock>,
}

impl GuardianGateway {
    pub fn new(
        tokens: Arc<dyn TokenAuthority>,
        validator: Arc<dyn ActionValidator>,
        audit: AuditQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { tokens, validator, audit, clock }
    }

    /// Authorize one action presented with `token_bytes`.
    ///
    /// # Pipeline
    ///
    /// 1. Decode the token; undecodable bytes → deny `token_invalid:malformed`
    /// 2. Verify the MAC chain and caveats; failure → deny `token_invalid:<kind>`
    /// 3. Require every `required_scopes` entry → deny `scope_missing:<scope>`
    /// 4. Require `min_tier` → deny `tier_insufficient`
    /// 5. Consume one presentation against the token's `max_uses` /
    ///    `rate_limit` counters; exhausted → deny `token_invalid:caveat_violation`
    /// 6. Call `validate_action`, **only reachable after steps 1–5 pass**
    /// 7. Submit the decision and raw context to the audit queue
    ///
    /// Every outcome, including denials at steps 1–5, is audited.
    pub async fn handle(&self, token_bytes: &[u8], action: ActionDescriptor) -> ValidationDecision {
        let request_id = uuid::Uuid::new_v4().to_string();
        let now = self.clock.now();

        debug!(
            request_id = %request_id,
            action = %action.action,
            resource = %action.resource,
            "gateway request received"
        );

        // ── Steps 1–5: token gates ────────────────────────────────────────────
        let token = match self.admit_token(&request_id, token_bytes, &action, now) {
            Ok(token) => token,
            Err(denial) => {
                self.audit.submit(denial.clone(), action.context);
                return denial;
            }
        };

        // ── Step 6: policy validation ────────────────────────────────────────
        let granted_scopes: BTreeSet<String> = token
            .scopes
            .intersection(&action.required_scopes)
            .cloned()
            .collect();

        let request = ValidationRequest {
            request_id,
            timestamp: now,
            subject: token.subject.clone(),
            tier: token.tier,
            action: action.action.clone(),
            resource: action.resource.clone(),
            granted_scopes,
            context: action.context.clone(),
            required_checks: action.required_checks.clone(),
            opted_out: BTreeSet::new(),
        };

        let budget = action.deadline_ms.map(Duration::from_millis);
        let decision = self.validator.validate_action(request, budget).await;

        if !decision.allowed {
            warn!(
                request_id = %decision.request_id,
                subject = %token.subject,
                risk_final = decision.risk_final,
                reasons = ?decision.reasons,
                "action denied"
            );
        }

        // ── Step 7: audit, after the decision is final ───────────────────────
        self.audit.submit(decision.clone(), action.context);
        decision
    }

    /// Wait for every decision returned so far to reach the audit trail.
    pub async fn flush_audit(&self) {
        self.audit.flush().await;
    }

    fn admit_token(
        &self,
        request_id: &str,
        token_bytes: &[u8],
        action: &ActionDescriptor,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<CapabilityToken, ValidationDecision> {
        let policy_version = self.validator.policy_version();

        let token = CapabilityToken::from_bytes(token_bytes).map_err(|e| {
            warn!(request_id = %request_id, error = %e, "token rejected");
            ValidationDecision::denied(
                request_id,
                policy_version,
                vec![format!("token_invalid:{}", e.kind())],
            )
        })?;

        let ctx = VerifyContext {
            resource: action.resource.clone(),
            now,
        };
        if let Err(e) = self.tokens.verify(&token, &ctx) {
            warn!(
                request_id = %request_id,
                token_id = %token.token_id,
                subject = %token.subject,
                error = %e,
                "token rejected"
            );
            return Err(ValidationDecision::denied(request_id, policy_version, token_invalid_reasons(&e)));
        }

        let missing: Vec<String> = action
            .required_scopes
            .iter()
            .filter(|scope| !token.has_scope(scope))
            .map(|scope| format!("scope_missing:{}", scope))
            .collect();
        if !missing.is_empty() {
            warn!(
                request_id = %request_id,
                token_id = %token.token_id,
                missing = ?missing,
                "token lacks required scopes"
            );
            return Err(ValidationDecision::denied(request_id, policy_version, missing));
        }

        if let Some(min_tier) = action.min_tier {
            if token.tier < min_tier {
                warn!(
                    request_id = %request_id,
                    token_id = %token.token_id,
                    tier = ?token.tier,
                    required = ?min_tier,
                    "token tier insufficient"
                );
                return Err(ValidationDecision::denied(
                    request_id,
                    policy_version,
                    vec!["tier_insufficient".to_string()],
                ));
            }
        }

        // Only a request that passed every read-only gate spends a use.
        if let Err(e) = self.tokens.consume(&token, now) {
            warn!(
                request_id = %request_id,
                token_id = %token.token_id,
                error = %e,
                "token presentation refused"
            );
            return Err(ValidationDecision::denied(request_id, policy_version, token_invalid_reasons(&e)));
        }

        Ok(token)
    }
}

/// `token_invalid:<kind>`, plus `caveat:<which>` for a caveat violation.
fn token_invalid_reasons(e: &TokenInvalid) -> Vec<String> {
    let mut reasons = vec![format!("token_invalid:{}", e.kind())];
    if let TokenInvalid::CaveatViolation { which, .. } = e {
        reasons.push(format!("caveat:{}", which));
    }
    reasons
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use guardian_contracts::{
        audit::AuditRecord,
        error::{GuardianError, GuardianResult, TokenInvalid},
        token::{CapabilityToken, Tier},
        validation::{ActionDescriptor, Context, ValidationDecision, ValidationRequest},
    };

    use crate::{
        audit_queue::{AuditQueue, RetryPolicy},
        clock::SystemClock,
        traits::{ActionValidator, AuditTrail, TokenAuthority, VerifyContext},
    };

    use super::GuardianGateway;

    // ── Mock helpers ─────────────────────────────────────────────────────────

    fn make_token(scopes: &[&str], tier: Tier) -> CapabilityToken {
        CapabilityToken {
            token_id: "tok-1".to_string(),
            subject: "agent-7".to_string(),
            tier,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            caveats: vec![],
            parent_token_id: None,
            key_epoch: 1,
            lineage: vec![],
            signature: "ab".to_string(),
        }
    }

    fn make_action(required_scopes: &[&str]) -> ActionDescriptor {
        ActionDescriptor {
            action: "memory.read".to_string(),
            resource: "memory/42".to_string(),
            required_scopes: required_scopes.iter().map(|s| s.to_string()).collect(),
            min_tier: None,
            required_checks: vec!["consent".to_string()],
            context: Context::new(),
            deadline_ms: None,
        }
    }

    /// A token authority that returns a pre-configured verdict.
    struct MockTokens {
        verdict: Result<(), TokenInvalid>,
        consumption: Result<(), TokenInvalid>,
        presentations: Arc<Mutex<u32>>,
    }

    impl MockTokens {
        fn accepting() -> Self {
            Self { verdict: Ok(()), consumption: Ok(()), presentations: Arc::new(Mutex::new(0)) }
        }

        fn rejecting(err: TokenInvalid) -> Self {
            Self { verdict: Err(err), ..Self::accepting() }
        }

        /// Verifies, but refuses to spend another presentation.
        fn exhausted(err: TokenInvalid) -> Self {
            Self { consumption: Err(err), ..Self::accepting() }
        }
    }

    impl TokenAuthority for MockTokens {
        fn verify(&self, _token: &CapabilityToken, _ctx: &VerifyContext) -> Result<(), TokenInvalid> {
            self.verdict.clone()
        }

        fn consume(&self, _token: &CapabilityToken, _now: DateTime<Utc>) -> Result<(), TokenInvalid> {
            self.consumption.clone()?;
            *self.presentations.lock().unwrap() += 1;
            Ok(())
        }
    }

    /// A validator that records every request it sees and always allows.
    struct MockValidator {
        seen: Arc<Mutex<Vec<ValidationRequest>>>,
    }

    impl MockValidator {
        fn new() -> Self {
            Self { seen: Arc::new(Mutex::new(vec![])) }
        }
    }

    #[async_trait]
    impl ActionValidator for MockValidator {
        async fn validate_action(
            &self,
            request: ValidationRequest,
            _budget: Option<Duration>,
        ) -> ValidationDecision {
            let decision = ValidationDecision {
                request_id: request.request_id.clone(),
                allowed: true,
                risk_final: 0.0,
                reasons: vec![],
                checks_run: vec![],
                checks_skipped: vec![],
                emergency_override: false,
                policy_version: "test-v1".to_string(),
            };
            self.seen.lock().unwrap().push(request);
            decision
        }

        fn policy_version(&self) -> &str {
            "test-v1"
        }
    }

    /// An audit trail that records decisions, optionally failing first.
    struct MockAudit {
        decisions: Arc<Mutex<Vec<ValidationDecision>>>,
        failures_left: Mutex<u32>,
    }

    impl MockAudit {
        fn new() -> Self {
            Self::failing(0)
        }

        fn failing(times: u32) -> Self {
            Self {
                decisions: Arc::new(Mutex::new(vec![])),
                failures_left: Mutex::new(times),
            }
        }
    }

    impl AuditTrail for MockAudit {
        fn append(&self, decision: &ValidationDecision, raw_context: &Context) -> GuardianResult<AuditRecord> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(GuardianError::AuditWriteFailed { reason: "disk full".to_string() });
            }
            let mut decisions = self.decisions.lock().unwrap();
            decisions.push(decision.clone());
            Ok(AuditRecord {
                sequence: decisions.len() as u64,
                decision: decision.clone(),
                context: raw_context.clone(),
                timestamp: Utc::now(),
                prev_hash: AuditRecord::GENESIS_HASH.to_string(),
                record_hash: String::new(),
            })
        }

        fn verify_chain(&self) -> bool {
            true
        }
    }

    fn gateway(tokens: MockTokens, validator: Arc<MockValidator>, audit: Arc<MockAudit>) -> GuardianGateway {
        GuardianGateway::new(
            Arc::new(tokens),
            validator,
            AuditQueue::spawn(audit),
            Arc::new(SystemClock),
        )
    }

    // ── Test cases ────────────────────────────────────────────────────────────

    /// Core security test: an invalid token must never reach the validator.
    #[tokio::test]
    async fn test_invalid_token_never_reaches_validator() {
        let validator = Arc::new(MockValidator::new());
        let audit = Arc::new(MockAudit::new());
        let gw = gateway(
            MockTokens::rejecting(TokenInvalid::SignatureInvalid { reason: "mac mismatch".into() }),
            Arc::clone(&validator),
            Arc::clone(&audit),
        );

        let token = make_token(&["memory:read"], Tier::Authenticated);
        let decision = gw.handle(&token.to_bytes(), make_action(&["memory:read"])).await;

        assert!(!decision.allowed);
        assert_eq!(decision.reasons, vec!["token_invalid:signature_invalid"]);
        assert!(validator.seen.lock().unwrap().is_empty(), "validator must not run on invalid token");

        // The denial is still audited.
        gw.flush_audit().await;
        assert_eq!(audit.decisions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_caveat_violation_names_the_caveat() {
        let validator = Arc::new(MockValidator::new());
        let gw = gateway(
            MockTokens::rejecting(TokenInvalid::CaveatViolation { which: "expiry".into(), index: 0 }),
            Arc::clone(&validator),
            Arc::new(MockAudit::new()),
        );

        let token = make_token(&["memory:read"], Tier::Authenticated);
        let decision = gw.handle(&token.to_bytes(), make_action(&[])).await;

        assert!(!decision.allowed);
        assert_eq!(decision.reasons, vec!["token_invalid:caveat_violation", "caveat:expiry"]);
    }

    #[tokio::test]
    async fn test_malformed_bytes_denied() {
        let validator = Arc::new(MockValidator::new());
        let gw = gateway(MockTokens::accepting(), Arc::clone(&validator), Arc::new(MockAudit::new()));

        let decision = gw.handle(b"\x00\x01garbage", make_action(&[])).await;

        assert!(!decision.allowed);
        assert_eq!(decision.reasons, vec!["token_invalid:malformed"]);
        assert!(validator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_scope_denied() {
        let validator = Arc::new(MockValidator::new());
        let tokens = MockTokens::accepting();
        let presentations = Arc::clone(&tokens.presentations);
        let gw = gateway(tokens, Arc::clone(&validator), Arc::new(MockAudit::new()));

        let token = make_token(&["memory:read"], Tier::Authenticated);
        let decision = gw
            .handle(&token.to_bytes(), make_action(&["memory:read", "memory:write"]))
            .await;

        assert!(!decision.allowed);
        assert_eq!(decision.reasons, vec!["scope_missing:memory:write"]);
        assert!(validator.seen.lock().unwrap().is_empty());
        assert_eq!(*presentations.lock().unwrap(), 0, "a denied token is not counted");
    }

    /// A token whose counted caveat is spent is denied before the validator.
    #[tokio::test]
    async fn test_exhausted_presentation_denied() {
        let validator = Arc::new(MockValidator::new());
        let audit = Arc::new(MockAudit::new());
        let gw = gateway(
            MockTokens::exhausted(TokenInvalid::CaveatViolation { which: "max_uses".into(), index: 1 }),
            Arc::clone(&validator),
            Arc::clone(&audit),
        );

        let token = make_token(&["memory:read"], Tier::Authenticated);
        let decision = gw.handle(&token.to_bytes(), make_action(&["memory:read"])).await;

        assert!(!decision.allowed);
        assert_eq!(decision.reasons, vec!["token_invalid:caveat_violation", "caveat:max_uses"]);
        assert!(validator.seen.lock().unwrap().is_empty());

        gw.flush_audit().await;
        assert_eq!(audit.decisions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_tier_denied() {
        let validator = Arc::new(MockValidator::new());
        let gw = gateway(MockTokens::accepting(), Arc::clone(&validator), Arc::new(MockAudit::new()));

        let token = make_token(&["memory:read"], Tier::Authenticated);
        let mut action = make_action(&["memory:read"]);
        action.min_tier = Some(Tier::Elevated);

        let decision = gw.handle(&token.to_bytes(), action).await;

        assert!(!decision.allowed);
        assert_eq!(decision.reasons, vec!["tier_insufficient"]);
    }

    /// A valid token reaches the validator with scopes narrowed to the
    /// intersection and no opt-outs.
    #[tokio::test]
    async fn test_valid_token_builds_request() {
        let validator = Arc::new(MockValidator::new());
        let tokens = MockTokens::accepting();
        let presentations = Arc::clone(&tokens.presentations);
        let audit = Arc::new(MockAudit::new());
        let gw = gateway(tokens, Arc::clone(&validator), Arc::clone(&audit));

        let token = make_token(&["memory:read", "memory:write", "admin:purge"], Tier::Elevated);
        let decision = gw.handle(&token.to_bytes(), make_action(&["memory:read"])).await;

        assert!(decision.allowed);
        assert_eq!(*presentations.lock().unwrap(), 1);

        let seen = validator.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let request = &seen[0];
        assert_eq!(request.subject, "agent-7");
        assert_eq!(request.tier, Tier::Elevated);
        assert_eq!(request.granted_scopes, BTreeSet::from(["memory:read".to_string()]));
        assert_eq!(request.required_checks, vec!["consent"]);
        assert!(request.opted_out.is_empty(), "the gateway never opts checks out");
        assert_eq!(request.request_id, decision.request_id);
        drop(seen);

        gw.flush_audit().await;
        assert_eq!(audit.decisions.lock().unwrap().len(), 1);
    }

    /// Audit writes land in submission order.
    #[tokio::test]
    async fn test_audit_preserves_submission_order() {
        let audit = Arc::new(MockAudit::new());
        let gw = gateway(MockTokens::accepting(), Arc::new(MockValidator::new()), Arc::clone(&audit));

        let token = make_token(&["memory:read"], Tier::Authenticated);
        let mut returned = Vec::new();
        for _ in 0..10 {
            returned.push(gw.handle(&token.to_bytes(), make_action(&[])).await.request_id);
        }
        gw.flush_audit().await;

        let audited: Vec<String> = audit
            .decisions
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.request_id.clone())
            .collect();
        assert_eq!(audited, returned);
    }

    /// A transient audit failure is retried and never changes the decision.
    #[tokio::test]
    async fn test_audit_failure_is_retried() {
        let audit = Arc::new(MockAudit::failing(2));
        let gw = GuardianGateway::new(
            Arc::new(MockTokens::accepting()),
            Arc::new(MockValidator::new()),
            AuditQueue::spawn_with_retry(
                Arc::clone(&audit) as Arc<dyn AuditTrail>,
                RetryPolicy { max_attempts: 3, initial_backoff: Duration::from_millis(1) },
            ),
            Arc::new(SystemClock),
        );

        let token = make_token(&["memory:read"], Tier::Authenticated);
        let decision = gw.handle(&token.to_bytes(), make_action(&[])).await;
        assert!(decision.allowed);

        gw.flush_audit().await;
        assert_eq!(audit.decisions.lock().unwrap().len(), 1);
    }
}
