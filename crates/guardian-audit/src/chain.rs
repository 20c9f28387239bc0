//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (bytes, in order):
//!   1. sequence as 8-byte little-endian
//!   2. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   3. canonical JSON of the record body (decision, context, timestamp)

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use guardian_contracts::{
    audit::AuditRecord,
    validation::{Context, ValidationDecision},
};

/// The part of a record its hash commits to besides its chain position.
#[derive(Serialize)]
struct RecordBody<'a> {
    decision: &'a ValidationDecision,
    context: &'a Context,
    timestamp: &'a DateTime<Utc>,
}

/// Compute the SHA-256 hash for one audit record.
///
/// Returns a lowercase 64-character hex string.
///
/// # Panics
///
/// Panics if the body cannot be serialized to JSON, which cannot happen for
/// `ValidationDecision` and a JSON `Context`.
pub fn hash_record(
    sequence: u64,
    prev_hash: &str,
    decision: &ValidationDecision,
    context: &Context,
    timestamp: &DateTime<Utc>,
) -> String {
    let body = serde_json::to_vec(&RecordBody { decision, context, timestamp })
        .expect("audit record body must always be serializable to JSON");

    let mut hasher = Sha256::new();
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&body);

    hex::encode(hasher.finalize())
}

/// Sequence number of the first record that breaks the chain, or `None` if
/// the chain is intact.
///
/// A record is broken when its `sequence` is out of place, its `prev_hash`
/// does not equal the previous record's `record_hash` (or `GENESIS_HASH`
/// for the first), or its `record_hash` does not match the recomputed value.
pub fn first_broken_link(records: &[AuditRecord]) -> Option<u64> {
    let mut expected_prev: &str = AuditRecord::GENESIS_HASH;

    for (expected_sequence, record) in (1u64..).zip(records) {
        let recomputed = hash_record(
            record.sequence,
            &record.prev_hash,
            &record.decision,
            &record.context,
            &record.timestamp,
        );
        if record.sequence != expected_sequence
            || record.prev_hash != expected_prev
            || record.record_hash != recomputed
        {
            return Some(expected_sequence);
        }
        expected_prev = record.record_hash.as_str();
    }

    None
}

/// Verify the integrity of a hash chain. An empty chain is valid.
pub fn verify_chain(records: &[AuditRecord]) -> bool {
    first_broken_link(records).is_none()
}
