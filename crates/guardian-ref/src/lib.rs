//! # guardian-ref
//!
//! Reference deployment of the Guardian gateway.
//!
//! Provides simple reference policy checks (consent, ethics, drift, and a
//! scripted check for deterministic runs), a fully wired `Deployment`, and
//! four end-to-end scenarios:
//!
//! 1. **Token Lifecycle**: attenuation, scope denial, caveat expiry, and key
//!    rotation.
//! 2. **Breaker Trip**: a failing check trips its breaker, is skipped while
//!    open, and recovers through a half-open trial.
//! 3. **Enforcement Disabled**: the bypass path allows the request and is
//!    still audited.
//! 4. **Kill Switch**: the emergency override denies without running checks.
//!
//! Nothing here calls out of process.

pub mod checks;
pub mod deployment;
pub mod scenarios;
