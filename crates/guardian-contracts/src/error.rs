//! Error types for the Guardian gateway.
//!
//! `TokenInvalid` is the only error that crosses the gateway boundary, and it
//! does so as a deny signal rather than a defect. `CheckError` is what policy
//! plugins return; the engine converts it into a failing check result. Every
//! other fallible operation returns `GuardianResult<T>`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a presented capability token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TokenInvalid {
    /// A MAC in the chain did not match, or its signing key is retired.
    #[error("token signature invalid: {reason}")]
    SignatureInvalid { reason: String },

    /// A caveat was not satisfied by the request context.
    ///
    /// `index` is the caveat's position in the token's caveat array.
    #[error("caveat '{which}' at index {index} not satisfied")]
    CaveatViolation { which: String, index: usize },

    /// A derived token claims more rights than its parent.
    #[error("attenuation widens parent rights: {reason}")]
    ScopeWidening { reason: String },

    /// The token bytes could not be decoded.
    #[error("malformed token: {reason}")]
    Malformed { reason: String },
}

impl TokenInvalid {
    /// Short label used in `token_invalid:<kind>` deny reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            TokenInvalid::SignatureInvalid { .. } => "signature_invalid",
            TokenInvalid::CaveatViolation { .. } => "caveat_violation",
            TokenInvalid::ScopeWidening { .. } => "scope_widening",
            TokenInvalid::Malformed { .. } => "malformed",
        }
    }
}

/// A failure reported by a policy check plugin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    /// The check ran but could not reach a verdict.
    #[error("check failed: {reason}")]
    Failed { reason: String },

    /// A dependency of the check is unreachable.
    #[error("check dependency unavailable: {reason}")]
    Unavailable { reason: String },
}

/// The unified error type for the Guardian crates.
#[derive(Debug, Error)]
pub enum GuardianError {
    /// A capability token failed decoding or verification.
    #[error("token invalid: {0}")]
    TokenInvalid(#[from] TokenInvalid),

    /// A policy check errored. Recovered inside the engine; never surfaced to
    /// gateway callers.
    #[error("check '{check_name}' failed: {cause}")]
    CheckFailure { check_name: String, cause: String },

    /// A policy check did not finish inside its deadline.
    #[error("check '{check_name}' exceeded its deadline")]
    DeadlineExceeded { check_name: String },

    /// The audit trail could not persist a record.
    ///
    /// Fatal to the audit subsystem only: the decision has already been
    /// returned to the caller.
    #[error("audit write failed: {reason}")]
    AuditWriteFailed { reason: String },

    /// A configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },
}

/// Convenience alias used throughout the Guardian crates.
pub type GuardianResult<T> = Result<T, GuardianError>;
