//! PII redaction applied before anything reaches the audit trail.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

use guardian_contracts::{
    error::{GuardianError, GuardianResult},
    validation::{Context, ValidationDecision},
};
use guardian_core::traits::Redactor;

/// The replacement text for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Built-in PII patterns, applied in this order. Longer digit runs come
/// first so a card number is not partially eaten by the phone pattern.
static PII_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Email addresses
        r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        // Payment card numbers: 13-16 digits, optionally space/dash grouped
        r"\b(?:\d[ -]?){12,15}\d\b",
        // US social security numbers
        r"\b\d{3}-\d{2}-\d{4}\b",
        // Phone numbers, with optional country code and separators
        r"(?:\+\d{1,2}[ .-]?)?\(?\b\d{3}\)?[ .-]?\d{3}[ .-]?\d{4}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid built-in PII pattern"))
    .collect()
});

/// Regex-backed redactor for emails, card numbers, SSNs and phone numbers.
///
/// Redaction is idempotent: `[REDACTED]` matches none of the patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternRedactor {
    custom_patterns: Vec<Regex>,
}

impl PatternRedactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a deployment-specific pattern (e.g. medical record numbers).
    ///
    /// Returns `GuardianError::ConfigError` if `pattern` is not a valid regex.
    pub fn with_pattern(mut self, pattern: &str) -> GuardianResult<Self> {
        let regex = Regex::new(pattern).map_err(|e| GuardianError::ConfigError {
            reason: format!("invalid redaction pattern '{}': {}", pattern, e),
        })?;
        self.custom_patterns.push(regex);
        Ok(self)
    }

    fn redact_cow<'a>(&self, input: &'a str) -> Cow<'a, str> {
        let mut result = Cow::Borrowed(input);
        for regex in PII_PATTERNS.iter().chain(&self.custom_patterns) {
            if regex.is_match(&result) {
                result = Cow::Owned(regex.replace_all(&result, REDACTED).into_owned());
            }
        }
        result
    }
}

impl Redactor for PatternRedactor {
    fn redact(&self, input: &str) -> String {
        self.redact_cow(input).into_owned()
    }
}

/// Redact every string inside a JSON value, recursively. Object keys are kept.
pub fn redact_value(redactor: &dyn Redactor, value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(redactor.redact(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(redactor, v)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(redactor, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub fn redact_context(redactor: &dyn Redactor, context: &Context) -> Context {
    context
        .iter()
        .map(|(k, v)| (k.clone(), redact_value(redactor, v)))
        .collect()
}

/// Copy of `decision` with its reasons and every check's reason and evidence
/// redacted. Verdict fields are untouched.
pub fn redact_decision(redactor: &dyn Redactor, decision: &ValidationDecision) -> ValidationDecision {
    let mut redacted = decision.clone();
    for reason in &mut redacted.reasons {
        *reason = redactor.redact(reason);
    }
    for result in &mut redacted.checks_run {
        result.reason = redactor.redact(&result.reason);
        result.evidence = redact_value(redactor, &result.evidence);
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_builtin_pii() {
        let r = PatternRedactor::new();
        let cases = [
            ("contact jane.doe@example.org today", "contact [REDACTED] today"),
            ("card 4111 1111 1111 1111 on file", "card [REDACTED] on file"),
            ("ssn 123-45-6789", "ssn [REDACTED]"),
            ("call (555) 123-4567", "call [REDACTED]"),
            ("call 555-123-4567 now", "call [REDACTED] now"),
        ];
        for (input, expected) in cases {
            assert_eq!(r.redact(input), expected);
        }
    }

    #[test]
    fn leaves_clean_text_alone() {
        let r = PatternRedactor::new();
        assert_eq!(r.redact("ethics:scored 0.4"), "ethics:scored 0.4");
        assert_eq!(r.redact("request 42 of 100"), "request 42 of 100");
    }

    #[test]
    fn redaction_is_idempotent() {
        let r = PatternRedactor::new();
        for input in [
            "mail a@b.io, ssn 123-45-6789, phone +1 555 123 4567",
            "4111-1111-1111-1111",
            "nothing to see",
        ] {
            let once = r.redact(input);
            assert_eq!(r.redact(&once), once);
        }
    }

    #[test]
    fn custom_patterns_extend_builtins() {
        let r = PatternRedactor::new().with_pattern(r"MRN-\d{6}").unwrap();
        assert_eq!(r.redact("patient MRN-004211"), "patient [REDACTED]");
        assert!(PatternRedactor::new().with_pattern("(unclosed").is_err());
    }

    #[test]
    fn redacts_nested_json_strings_only() {
        let r = PatternRedactor::new();
        let value = json!({
            "user": { "email": "x@y.com", "age": 41 },
            "notes": ["fine", "ssn 123-45-6789"],
        });
        let out = redact_value(&r, &value);
        assert_eq!(out["user"]["email"], json!("[REDACTED]"));
        assert_eq!(out["user"]["age"], json!(41));
        assert_eq!(out["notes"], json!(["fine", "ssn [REDACTED]"]));
    }
}
