//! Audit record types.
//!
//! `AuditRecord` is one link of the hash chain: a redacted decision and
//! context, committed to by `record_hash` and linked to its predecessor by
//! `prev_hash`. `AuditLog` is the sealed export handed to compliance tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validation::{Context, ValidationDecision};

/// One entry in the append-only decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the chain, starting at 1.
    pub sequence: u64,
    /// The decision, with free-text fields redacted.
    pub decision: ValidationDecision,
    /// The request context, redacted.
    pub context: Context,
    pub timestamp: DateTime<Utc>,
    /// `record_hash` of the previous record, or `GENESIS_HASH`.
    pub prev_hash: String,
    /// SHA-256 (hex) over sequence, prev_hash, and the canonical body.
    pub record_hash: String,
}

impl AuditRecord {
    /// The `prev_hash` of the first record in every chain: 64 hex zeros.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// A sealed copy of the decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub records: Vec<AuditRecord>,
    pub finalized_at: DateTime<Utc>,
    /// `record_hash` of the last record. Empty if the log is empty.
    pub terminal_hash: String,
}
