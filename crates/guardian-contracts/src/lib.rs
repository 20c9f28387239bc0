//! # guardian-contracts
//!
//! Shared types and error contracts for the Guardian gateway.
//!
//! Every crate in the workspace imports from here. No business logic lives in
//! this crate: only data definitions and error types.

pub mod audit;
pub mod breaker;
pub mod error;
pub mod token;
pub mod validation;

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use error::{GuardianError, TokenInvalid};
    use token::{CapabilityToken, Caveat, Tier, TokenLink};
    use validation::{PolicyCheckResult, SkipReason, ValidationDecision, ValidationRequest};

    fn scopes(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn token(lineage: Vec<TokenLink>) -> CapabilityToken {
        CapabilityToken {
            token_id: "tok-child".to_string(),
            subject: "agent-7".to_string(),
            tier: Tier::Authenticated,
            scopes: scopes(&["memory:read"]),
            caveats: vec![],
            parent_token_id: lineage.last().map(|l| l.token_id.clone()),
            key_epoch: 1,
            lineage,
            signature: "00".to_string(),
        }
    }

    // ── Tier ─────────────────────────────────────────────────────────────────

    #[test]
    fn tier_order_is_privilege_order() {
        assert!(Tier::Public < Tier::Authenticated);
        assert!(Tier::Authenticated < Tier::Elevated);
        assert!(Tier::Elevated < Tier::Privileged);
        assert!(Tier::Privileged < Tier::Admin);
        assert!(Tier::Admin < Tier::System);
    }

    // ── Caveat ───────────────────────────────────────────────────────────────

    #[test]
    fn unknown_caveat_kind_decodes_as_unrecognized() {
        let json = r#"{"kind":"geo_fence","region":"eu-west"}"#;
        let caveat: Caveat = serde_json::from_str(json).unwrap();
        assert_eq!(caveat, Caveat::Unrecognized);
        assert_eq!(caveat.kind(), "unrecognized");
    }

    #[test]
    fn caveat_wire_format_is_kind_tagged() {
        let caveat = Caveat::RateLimit { max_calls: 10, window_secs: 60 };
        let value = serde_json::to_value(&caveat).unwrap();
        assert_eq!(value["kind"], "rate_limit");
        assert_eq!(value["max_calls"], 10);
    }

    // ── CapabilityToken ──────────────────────────────────────────────────────

    #[test]
    fn root_token_id_walks_to_lineage_head() {
        let root = TokenLink {
            token_id: "tok-root".to_string(),
            tier: Tier::Admin,
            scopes: scopes(&["memory:read", "memory:write"]),
            caveats: vec![],
        };
        assert_eq!(token(vec![root]).root_token_id(), "tok-root");
        assert_eq!(token(vec![]).root_token_id(), "tok-child");
    }

    #[test]
    fn token_bytes_decode_back_to_the_same_token() {
        let original = token(vec![]);
        let decoded = CapabilityToken::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn garbage_bytes_are_malformed() {
        let err = CapabilityToken::from_bytes(b"not a token").unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    // ── Validation types ─────────────────────────────────────────────────────

    #[test]
    fn request_builder_tracks_opt_outs() {
        let request = ValidationRequest::new("agent-7", "memory.write", "memory/42")
            .with_checks(["consent", "ethics"])
            .opt_out("consent");
        assert_eq!(request.required_checks, vec!["consent", "ethics"]);
        assert!(request.is_opted_out("consent"));
        assert!(!request.is_opted_out("ethics"));
    }

    #[test]
    fn fail_closed_result_carries_max_risk() {
        let result = PolicyCheckResult::fail_closed("ethics", "check_error");
        assert!(!result.passed);
        assert_eq!(result.risk_score, 1.0);
    }

    #[test]
    fn denied_decision_is_max_risk_and_runs_nothing() {
        let decision = ValidationDecision::denied("req-1", "v1", vec!["token_invalid:malformed".into()]);
        assert!(!decision.allowed);
        assert_eq!(decision.risk_final, 1.0);
        assert!(decision.checks_run.is_empty());
        assert!(!decision.emergency_override);
    }

    #[test]
    fn skip_reason_labels() {
        assert_eq!(SkipReason::CircuitOpen.as_str(), "circuit_open");
        assert_eq!(SkipReason::OptedOut.as_str(), "opted_out");
        assert_eq!(SkipReason::DeadlineExceeded.as_str(), "deadline_exceeded");
    }

    // ── Error display messages ───────────────────────────────────────────────

    #[test]
    fn token_invalid_kinds_are_stable() {
        let cases = [
            (TokenInvalid::SignatureInvalid { reason: "x".into() }, "signature_invalid"),
            (TokenInvalid::CaveatViolation { which: "expiry".into(), index: 0 }, "caveat_violation"),
            (TokenInvalid::ScopeWidening { reason: "x".into() }, "scope_widening"),
            (TokenInvalid::Malformed { reason: "x".into() }, "malformed"),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn error_wraps_token_invalid() {
        let err: GuardianError = TokenInvalid::CaveatViolation { which: "expiry".into(), index: 2 }.into();
        let msg = err.to_string();
        assert!(msg.contains("token invalid"));
        assert!(msg.contains("expiry"));
    }

    #[test]
    fn error_audit_write_failed_display() {
        let err = GuardianError::AuditWriteFailed { reason: "disk full".to_string() };
        let msg = err.to_string();
        assert!(msg.contains("audit write failed"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn error_deadline_exceeded_names_check() {
        let err = GuardianError::DeadlineExceeded { check_name: "drift".to_string() };
        assert!(err.to_string().contains("drift"));
    }
}
