//! Ordered, asynchronous audit submission.
//!
//! The gateway returns a decision as soon as it is computed and hands the
//! audit write to an `AuditQueue`. A single background task drains the queue
//! and appends to the `AuditTrail` in submission order, so the chain order
//! follows the order decisions were returned, not the order checks finished.
//!
//! A failed append is retried with exponential backoff. When retries are
//! exhausted the record is reported at `error!` level for out-of-band
//! alerting; a returned decision is never affected.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use guardian_contracts::validation::{Context, ValidationDecision};

use crate::traits::AuditTrail;

/// How persistently the writer retries a failed append.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(20),
        }
    }
}

enum AuditJob {
    Append {
        decision: ValidationDecision,
        context: Context,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle for submitting decisions to the background audit writer.
///
/// Cloning the handle shares the same queue and ordering.
#[derive(Clone)]
pub struct AuditQueue {
    tx: mpsc::UnboundedSender<AuditJob>,
}

impl AuditQueue {
    /// Spawn the writer task on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(trail: Arc<dyn AuditTrail>) -> Self {
        Self::spawn_with_retry(trail, RetryPolicy::default())
    }

    pub fn spawn_with_retry(trail: Arc<dyn AuditTrail>, retry: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(trail, rx, retry));
        Self { tx }
    }

    /// Enqueue a decision for appending. Never blocks.
    pub fn submit(&self, decision: ValidationDecision, context: Context) {
        let request_id = decision.request_id.clone();
        if self.tx.send(AuditJob::Append { decision, context }).is_err() {
            error!(
                request_id = %request_id,
                "audit writer has stopped; decision was not recorded"
            );
        }
    }

    /// Wait until every decision submitted before this call has been
    /// appended (or abandoned after retries).
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(AuditJob::Flush(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

async fn run_writer(
    trail: Arc<dyn AuditTrail>,
    mut rx: mpsc::UnboundedReceiver<AuditJob>,
    retry: RetryPolicy,
) {
    while let Some(job) = rx.recv().await {
        match job {
            AuditJob::Append { decision, context } => {
                append_with_retry(trail.as_ref(), &decision, &context, retry).await;
            }
            AuditJob::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("audit writer stopped: all queue handles dropped");
}

async fn append_with_retry(
    trail: &dyn AuditTrail,
    decision: &ValidationDecision,
    context: &Context,
    retry: RetryPolicy,
) {
    let mut backoff = retry.initial_backoff;
    for attempt in 1..=retry.max_attempts.max(1) {
        match trail.append(decision, context) {
            Ok(record) => {
                debug!(
                    request_id = %decision.request_id,
                    sequence = record.sequence,
                    "decision appended to audit trail"
                );
                return;
            }
            Err(e) if attempt < retry.max_attempts => {
                warn!(
                    request_id = %decision.request_id,
                    attempt,
                    error = %e,
                    "audit append failed; retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(e) => {
                error!(
                    request_id = %decision.request_id,
                    allowed = decision.allowed,
                    attempts = attempt,
                    error = %e,
                    "audit append abandoned after retries"
                );
            }
        }
    }
}
