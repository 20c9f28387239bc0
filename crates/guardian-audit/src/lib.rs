//! # guardian-audit
//!
//! Redacted, append-only, SHA-256 hash-chained decision log for the Guardian
//! gateway.
//!
//! ## Overview
//!
//! Every `ValidationDecision` the gateway returns is redacted, wrapped in an
//! `AuditRecord`, and linked to the previous record via its SHA-256 hash.
//! Tampering with any record, even a single byte, breaks the chain and is
//! located by `first_broken_link`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use guardian_audit::InMemoryAuditTrail;
//! use guardian_core::traits::AuditTrail;
//!
//! let trail = InMemoryAuditTrail::with_default_redactor();
//! trail.append(&decision, &raw_context)?;
//!
//! assert!(trail.verify_chain());
//! let log = trail.export_log();
//! ```

pub mod chain;
pub mod memory;
pub mod redact;

pub use chain::{first_broken_link, hash_record, verify_chain};
pub use memory::InMemoryAuditTrail;
pub use redact::{PatternRedactor, REDACTED};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use guardian_contracts::{
        audit::AuditRecord,
        validation::{Context, PolicyCheckResult, ValidationDecision},
    };
    use guardian_core::traits::AuditTrail;

    use super::InMemoryAuditTrail;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn make_decision(request_id: &str, allowed: bool) -> ValidationDecision {
        ValidationDecision {
            request_id: request_id.to_string(),
            allowed,
            risk_final: if allowed { 0.0 } else { 1.0 },
            reasons: if allowed { vec![] } else { vec!["ethics:blocked term".to_string()] },
            checks_run: vec![PolicyCheckResult::pass("consent", "consent on file")],
            checks_skipped: vec![],
            emergency_override: false,
            policy_version: "test".to_string(),
        }
    }

    fn context(pairs: &[(&str, serde_json::Value)]) -> Context {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn trail_with(n: usize) -> InMemoryAuditTrail {
        let trail = InMemoryAuditTrail::with_default_redactor();
        for i in 0..n {
            let ctx = context(&[("step", json!(i))]);
            trail.append(&make_decision(&format!("req-{i}"), i % 2 == 0), &ctx).unwrap();
        }
        trail
    }

    // ── Chain ────────────────────────────────────────────────────────────────

    #[test]
    fn test_hash_chain_integrity() {
        let trail = trail_with(3);
        assert!(trail.verify_chain(), "chain must be valid after sequential appends");
        assert_eq!(trail.first_broken_link(), None);
    }

    /// Corrupting record `k`'s stored hash is detected, and `k` is reported
    /// as the first broken link, for every `k` in `1..=N`.
    #[test]
    fn test_first_broken_link_locates_tampered_hash() {
        const N: u64 = 8;
        for k in 1..=N {
            let trail = trail_with(N as usize);
            {
                let mut state = trail.state.lock().unwrap();
                let record = &mut state.records[(k - 1) as usize];
                record.record_hash = "f".repeat(64);
            }
            assert!(!trail.verify_chain(), "k={k}");
            assert_eq!(trail.first_broken_link(), Some(k));
        }
    }

    #[test]
    fn test_tampered_body_detected() {
        let trail = trail_with(4);
        {
            let mut state = trail.state.lock().unwrap();
            let flipped = !state.records[2].decision.allowed;
            state.records[2].decision.allowed = flipped;
        }
        assert_eq!(trail.first_broken_link(), Some(3));
    }

    #[test]
    fn test_removed_record_detected() {
        let trail = trail_with(4);
        let mut records = trail.records();
        records.remove(1);
        assert_eq!(super::first_broken_link(&records), Some(2));
    }

    #[test]
    fn test_genesis_hash() {
        let trail = trail_with(1);
        let log = trail.export_log();
        assert_eq!(log.records[0].prev_hash, AuditRecord::GENESIS_HASH);
    }

    #[test]
    fn test_sequence_monotonic() {
        let trail = trail_with(3);
        for (idx, record) in trail.records().iter().enumerate() {
            assert_eq!(record.sequence, idx as u64 + 1);
        }
    }

    #[test]
    fn test_export_log() {
        let trail = trail_with(3);
        let log = trail.export_log();

        assert_eq!(log.records.len(), 3);
        assert_eq!(log.terminal_hash, log.records.last().unwrap().record_hash);
        assert!(super::verify_chain(&log.records));
    }

    #[test]
    fn test_verify_empty() {
        let trail = InMemoryAuditTrail::with_default_redactor();
        assert!(trail.is_empty());
        assert!(trail.verify_chain());
        assert!(super::verify_chain(&[]));
        assert_eq!(trail.export_log().terminal_hash, "");
    }

    #[test]
    fn test_concurrent_appends_keep_chain_valid() {
        let trail = Arc::new(InMemoryAuditTrail::with_default_redactor());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let trail = Arc::clone(&trail);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        trail
                            .append(&make_decision(&format!("t{t}-{i}"), true), &Context::new())
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(trail.len(), 100);
        assert!(trail.verify_chain());
    }

    // ── Redaction ────────────────────────────────────────────────────────────

    #[test]
    fn test_pii_never_reaches_the_trail() {
        let trail = InMemoryAuditTrail::with_default_redactor();
        let mut decision = make_decision("req-pii", false);
        decision.reasons.push("consent:no consent for jane@example.org".to_string());
        decision.checks_run[0].evidence = json!({ "phone": "555-123-4567" });
        let ctx = context(&[
            ("patient", json!({ "ssn": "123-45-6789", "name": "J. Doe" })),
            ("turn", json!(3)),
        ]);

        let record = trail.append(&decision, &ctx).unwrap();

        assert_eq!(record.context["patient"]["ssn"], json!("[REDACTED]"));
        assert_eq!(record.context["patient"]["name"], json!("J. Doe"));
        assert_eq!(record.context["turn"], json!(3));
        assert_eq!(record.decision.reasons[1], "consent:no consent for [REDACTED]");
        assert_eq!(record.decision.checks_run[0].evidence["phone"], json!("[REDACTED]"));

        // The verdict itself is untouched.
        assert!(!record.decision.allowed);
        assert_eq!(record.decision.request_id, "req-pii");

        let dump = serde_json::to_string(&trail.export_log()).unwrap();
        assert!(!dump.contains("jane@example.org"));
        assert!(!dump.contains("123-45-6789"));
        assert!(trail.verify_chain());
    }
}
