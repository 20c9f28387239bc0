//! In-memory implementation of `AuditTrail`.
//!
//! `InMemoryAuditTrail` keeps every record in a `Vec` behind a single
//! writer `Mutex`. `append` redacts, hashes and pushes under that lock, so
//! the chain is extended strictly in call order.
//!
//! Use `export_log()` to obtain a sealed `AuditLog`, and `verify_chain()` or
//! `first_broken_link()` at any time to confirm the chain has not been
//! tampered with in memory.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use guardian_contracts::{
    audit::{AuditLog, AuditRecord},
    error::{GuardianError, GuardianResult},
    validation::{Context, ValidationDecision},
};
use guardian_core::{
    clock::{Clock, SystemClock},
    traits::{AuditTrail, Redactor},
};

use crate::{
    chain::{first_broken_link, hash_record},
    redact::{redact_context, redact_decision, PatternRedactor},
};

// ── Internal mutable state ────────────────────────────────────────────────────

pub(crate) struct InMemoryState {
    /// All records appended so far, in append order.
    pub(crate) records: Vec<AuditRecord>,

    /// The `record_hash` of the last record, or `GENESIS_HASH`.
    pub(crate) last_hash: String,
}

// ── Public trail ──────────────────────────────────────────────────────────────

/// An in-memory, append-only decision log backed by a SHA-256 hash chain.
pub struct InMemoryAuditTrail {
    redactor: Arc<dyn Redactor>,
    clock: Arc<dyn Clock>,
    pub(crate) state: Mutex<InMemoryState>,
}

impl InMemoryAuditTrail {
    /// A trail that redacts with `redactor` and stamps records with the
    /// system clock.
    pub fn new(redactor: Arc<dyn Redactor>) -> Self {
        Self {
            redactor,
            clock: Arc::new(SystemClock),
            state: Mutex::new(InMemoryState {
                records: Vec::new(),
                last_hash: AuditRecord::GENESIS_HASH.to_string(),
            }),
        }
    }

    /// A trail using the built-in `PatternRedactor`.
    pub fn with_default_redactor() -> Self {
        Self::new(Arc::new(PatternRedactor::new()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// A consistent snapshot of every record appended so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.read().records.clone()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence number of the first tampered record, if any.
    pub fn first_broken_link(&self) -> Option<u64> {
        first_broken_link(&self.read().records)
    }

    /// Export a sealed `AuditLog` containing every record appended so far.
    ///
    /// The `terminal_hash` is the `record_hash` of the last record, or an
    /// empty string when the trail is empty.
    pub fn export_log(&self) -> AuditLog {
        let state = self.read();
        let terminal_hash = state
            .records
            .last()
            .map(|r| r.record_hash.clone())
            .unwrap_or_default();

        info!(
            record_count = state.records.len(),
            terminal_hash = %terminal_hash,
            "audit log sealed"
        );

        AuditLog {
            records: state.records.clone(),
            finalized_at: self.clock.now(),
            terminal_hash,
        }
    }

    fn read(&self) -> MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── AuditTrail impl ───────────────────────────────────────────────────────────

impl AuditTrail for InMemoryAuditTrail {
    /// Redact, hash, and append one decision.
    ///
    /// Returns `Err(AuditWriteFailed)` only if the writer mutex is poisoned.
    fn append(&self, decision: &ValidationDecision, raw_context: &Context) -> GuardianResult<AuditRecord> {
        let decision = redact_decision(self.redactor.as_ref(), decision);
        let context = redact_context(self.redactor.as_ref(), raw_context);

        let mut state = self.state.lock().map_err(|e| GuardianError::AuditWriteFailed {
            reason: format!("audit state lock poisoned: {}", e),
        })?;

        let sequence = state.records.len() as u64 + 1;
        let prev_hash = state.last_hash.clone();
        let timestamp = self.clock.now();
        let record_hash = hash_record(sequence, &prev_hash, &decision, &context, &timestamp);

        let record = AuditRecord {
            sequence,
            decision,
            context,
            timestamp,
            prev_hash,
            record_hash: record_hash.clone(),
        };
        state.records.push(record.clone());
        state.last_hash = record_hash;

        debug!(
            sequence,
            request_id = %record.decision.request_id,
            allowed = record.decision.allowed,
            "audit record appended"
        );
        Ok(record)
    }

    fn verify_chain(&self) -> bool {
        self.first_broken_link().is_none()
    }
}
