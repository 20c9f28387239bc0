//! Caveat evaluation.
//!
//! `CaveatVerifier` answers one question: does this caveat hold for this
//! request? Every built-in kind is a pure predicate over the caveat and the
//! `VerifyContext`; usage and rate state are read from injected counters.
//! Anything the verifier cannot evaluate (an unrecognized kind or an
//! unregistered custom predicate) is unsatisfied.
//!
//! Reading a counter is not spending it. `consume` is the separate, atomic
//! step that charges an accepted presentation to the `max_uses` and
//! `rate_limit` counters and refuses once either is exhausted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use guardian_contracts::{error::TokenInvalid, token::Caveat};
use guardian_core::traits::{RateLimiter, UsageCounter, VerifyContext};

/// A named caveat predicate supplied by the hosting application.
///
/// Receives the caveat's `value` and the request context. Returns `true` when
/// the caveat is satisfied.
pub type CustomCaveatFn = Box<dyn Fn(&str, &VerifyContext) -> bool + Send + Sync>;

pub struct CaveatVerifier {
    usage: Arc<dyn UsageCounter>,
    rate: Arc<dyn RateLimiter>,
    custom: HashMap<String, CustomCaveatFn>,
}

impl CaveatVerifier {
    pub fn new(usage: Arc<dyn UsageCounter>, rate: Arc<dyn RateLimiter>) -> Self {
        Self {
            usage,
            rate,
            custom: HashMap::new(),
        }
    }

    /// Register a predicate for `Caveat::Custom { name, .. }`.
    ///
    /// Registering the same name twice replaces the previous predicate.
    pub fn register_predicate(&mut self, name: impl Into<String>, f: CustomCaveatFn) {
        self.custom.insert(name.into(), f);
    }

    /// Return true if `caveat` is satisfied for a token of lineage
    /// `lineage_id` presented in `ctx`.
    pub fn verify(&self, caveat: &Caveat, ctx: &VerifyContext, lineage_id: &str) -> bool {
        let satisfied = match caveat {
            Caveat::Expiry { not_after } => ctx.now <= *not_after,

            Caveat::ResourceGlob { pattern } => glob_matches(pattern, &ctx.resource),

            Caveat::MaxUses { limit } => self.usage.uses(lineage_id) < *limit,

            // The presentation being verified is not yet recorded, so it
            // would be call number `prior + 1`.
            Caveat::RateLimit { max_calls, window_secs } => {
                let prior =
                    self.rate
                        .calls_in_window(lineage_id, Duration::from_secs(*window_secs), ctx.now);
                prior < *max_calls
            }

            Caveat::Custom { name, value } => match self.custom.get(name.as_str()) {
                Some(f) => f(value, ctx),
                None => false,
            },

            Caveat::Unrecognized => false,
        };

        if !satisfied {
            debug!(
                caveat = caveat.kind(),
                lineage_id = %lineage_id,
                resource = %ctx.resource,
                "caveat not satisfied"
            );
        }
        satisfied
    }

    /// Charge one presentation of lineage `lineage_id` to the counters that
    /// `caveats` reference.
    ///
    /// The tightest `max_uses` limit is consumed first, then every
    /// `rate_limit` is acquired together. If the rate limiter refuses, the use
    /// is refunded, so a refused presentation leaves nothing spent. A caveat
    /// list with neither kind touches no counter.
    pub fn consume(&self, caveats: &[Caveat], lineage_id: &str, now: DateTime<Utc>) -> Result<(), TokenInvalid> {
        let mut tightest: Option<(usize, u64)> = None;
        let mut rate_limits = Vec::new();
        let mut rate_indices = Vec::new();

        for (index, caveat) in caveats.iter().enumerate() {
            match caveat {
                Caveat::MaxUses { limit } => {
                    if tightest.map_or(true, |(_, current)| *limit < current) {
                        tightest = Some((index, *limit));
                    }
                }
                Caveat::RateLimit { max_calls, window_secs } => {
                    rate_limits.push((*max_calls, Duration::from_secs(*window_secs)));
                    rate_indices.push(index);
                }
                _ => {}
            }
        }

        if let Some((index, limit)) = tightest {
            if !self.usage.try_consume(lineage_id, limit) {
                return Err(exhausted(caveats, index, lineage_id));
            }
        }

        if !rate_limits.is_empty() {
            if let Err(position) = self.rate.try_acquire(lineage_id, &rate_limits, now) {
                if tightest.is_some() {
                    self.usage.refund(lineage_id);
                }
                let index = rate_indices.get(position).copied().unwrap_or(rate_indices[0]);
                return Err(exhausted(caveats, index, lineage_id));
            }
        }

        Ok(())
    }
}

fn exhausted(caveats: &[Caveat], index: usize, lineage_id: &str) -> TokenInvalid {
    let which = caveats[index].kind();
    debug!(caveat = which, index, lineage_id = %lineage_id, "counted caveat exhausted");
    TokenInvalid::CaveatViolation {
        which: which.to_string(),
        index,
    }
}

/// Match `text` against a glob where `*` matches any run of characters
/// (including none) and `?` matches exactly one.
pub fn glob_matches(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            // Let the last star absorb one more character and retry.
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{InMemoryUsageCounter, SlidingWindowRateLimiter};
    use chrono::Duration as ChronoDuration;

    fn verifier() -> CaveatVerifier {
        CaveatVerifier::new(
            Arc::new(InMemoryUsageCounter::new()),
            Arc::new(SlidingWindowRateLimiter::new()),
        )
    }

    fn ctx(resource: &str) -> VerifyContext {
        VerifyContext {
            resource: resource.to_string(),
            now: Utc::now(),
        }
    }

    #[test]
    fn glob_wildcards() {
        assert!(glob_matches("memory/*", "memory/user-42/notes"));
        assert!(glob_matches("memory/user-??", "memory/user-42"));
        assert!(glob_matches("*", ""));
        assert!(glob_matches("a*b*c", "aXXbYYc"));
        assert!(!glob_matches("memory/*", "vault/secret"));
        assert!(!glob_matches("memory/user-?", "memory/user-42"));
        assert!(!glob_matches("", "x"));
    }

    #[test]
    fn expiry_boundary() {
        let v = verifier();
        let c = ctx("memory/1");
        assert!(v.verify(&Caveat::Expiry { not_after: c.now }, &c, "root"));
        let past = Caveat::Expiry { not_after: c.now - ChronoDuration::seconds(1) };
        assert!(!v.verify(&past, &c, "root"));
    }

    #[test]
    fn max_uses_reads_the_counter_and_consume_spends_it() {
        let v = verifier();
        let c = ctx("memory/1");
        let caveats = [Caveat::MaxUses { limit: 2 }];

        assert!(v.verify(&caveats[0], &c, "root"));
        v.consume(&caveats, "root", c.now).unwrap();
        assert!(v.verify(&caveats[0], &c, "root"), "verify alone spends nothing");
        assert!(v.verify(&caveats[0], &c, "root"));
        v.consume(&caveats, "root", c.now).unwrap();
        assert!(!v.verify(&caveats[0], &c, "root"), "third use must be refused");
        assert_eq!(
            v.consume(&caveats, "root", c.now),
            Err(TokenInvalid::CaveatViolation { which: "max_uses".into(), index: 0 })
        );

        // Other lineages are unaffected.
        assert!(v.verify(&caveats[0], &c, "other-root"));
    }

    #[test]
    fn tightest_max_uses_governs_a_shared_counter() {
        let v = verifier();
        let now = Utc::now();
        let caveats = [Caveat::MaxUses { limit: 5 }, Caveat::MaxUses { limit: 1 }];

        v.consume(&caveats, "root", now).unwrap();
        assert_eq!(
            v.consume(&caveats, "root", now),
            Err(TokenInvalid::CaveatViolation { which: "max_uses".into(), index: 1 })
        );
    }

    #[test]
    fn rate_limit_counts_only_inside_window() {
        let v = verifier();
        let c = ctx("memory/1");
        let caveats = [Caveat::RateLimit { max_calls: 2, window_secs: 60 }];

        v.consume(&caveats, "root", c.now - ChronoDuration::seconds(120)).unwrap();
        v.consume(&caveats, "root", c.now - ChronoDuration::seconds(10)).unwrap();
        assert!(v.verify(&caveats[0], &c, "root"));

        v.consume(&caveats, "root", c.now - ChronoDuration::seconds(5)).unwrap();
        assert!(!v.verify(&caveats[0], &c, "root"));
    }

    #[test]
    fn refused_rate_limit_refunds_the_use() {
        let usage = Arc::new(InMemoryUsageCounter::new());
        let v = CaveatVerifier::new(usage.clone(), Arc::new(SlidingWindowRateLimiter::new()));
        let now = Utc::now();
        let caveats = [
            Caveat::ResourceGlob { pattern: "memory/*".into() },
            Caveat::MaxUses { limit: 5 },
            Caveat::RateLimit { max_calls: 1, window_secs: 60 },
        ];

        v.consume(&caveats, "root", now).unwrap();
        assert_eq!(
            v.consume(&caveats, "root", now),
            Err(TokenInvalid::CaveatViolation { which: "rate_limit".into(), index: 2 })
        );
        assert_eq!(usage.uses("root"), 1);
    }

    #[test]
    fn custom_predicates_fail_closed_when_unregistered() {
        let mut v = verifier();
        let caveat = Caveat::Custom { name: "action_prefix".into(), value: "memory/".into() };

        assert!(!v.verify(&caveat, &ctx("memory/1"), "root"));

        v.register_predicate(
            "action_prefix",
            Box::new(|value, ctx| ctx.resource.starts_with(value)),
        );
        assert!(v.verify(&caveat, &ctx("memory/1"), "root"));
        assert!(!v.verify(&caveat, &ctx("vault/1"), "root"));
    }

    #[test]
    fn unrecognized_caveat_is_never_satisfied() {
        assert!(!verifier().verify(&Caveat::Unrecognized, &ctx("anything"), "root"));
    }
}
