//! # Retry Queue & Dead-Letter Log
//!
//! Submissions fail — the remote chain times out, a worker hits a bad
//! moment — and the ledger's contract is that a failed transaction is
//! retried a bounded number of times and then parked somewhere an operator
//! can find it. Never retried forever, never silently discarded.
//!
//! ## Backoff
//!
//! Each entry carries a `not_before` instant; `drain_batch` only hands out
//! entries whose moment has come. Requeueing after attempt `n` pushes
//! `not_before` out by `backoff_base * 2^n`, so a dead remote gets probed
//! progressively less often instead of being hammered every tick.
//!
//! ## The payload, not the sealed transaction
//!
//! The queue stores the frozen post-encryption payload rather than a sealed
//! transaction. Resubmission re-seals from the payload — the content digest
//! is deterministic, so the hash handed to the original caller stays valid;
//! only the signature (possibly under a newer key generation) and the
//! Merkle snapshot are fresh.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::transaction::TransactionKind;

/// A submission that failed and is waiting for another attempt.
#[derive(Debug, Clone)]
pub struct FailedTransaction {
    /// The content hash the original caller holds. Deterministic over
    /// `(kind, payload)`, so it survives re-sealing.
    pub hash: String,
    pub kind: TransactionKind,
    /// The frozen payload, sensitive fields already sealed.
    pub payload: Map<String, Value>,
    /// The original event timestamp — resubmission must not re-date the
    /// event.
    pub timestamp: DateTime<Utc>,
    /// Attempts completed so far.
    pub retry_count: u32,
    /// The error from the most recent attempt.
    pub last_error: String,
    /// Earliest instant the next attempt may run.
    not_before: Instant,
}

/// A transaction that exhausted its retries. Permanent, inspectable,
/// never resubmitted automatically.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Operator handle for this entry.
    pub id: Uuid,
    pub hash: String,
    pub kind: TransactionKind,
    pub payload: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    /// Total attempts made before giving up.
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

/// Tunables for retry behaviour.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before an entry is routed to the dead-letter log.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub backoff_base: Duration,
}

// ---------------------------------------------------------------------------
// RetryQueue
// ---------------------------------------------------------------------------

/// FIFO queue of failed submissions with bounded, backoff-gated retries.
///
/// Mutated from the recording path (enqueue on failure) and the retry
/// worker (drain/requeue); a single mutex over the queue keeps both honest.
/// The dead-letter log has its own lock so operators can inspect it without
/// contending with the drain path.
pub struct RetryQueue {
    queue: Mutex<VecDeque<FailedTransaction>>,
    dead: Mutex<Vec<DeadLetter>>,
    policy: RetryPolicy,
}

impl RetryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            dead: Mutex::new(Vec::new()),
            policy,
        }
    }

    /// Wraps a failed payload as a [`FailedTransaction`] with zero retries
    /// and queues it. The first retry is eligible immediately — the backoff
    /// schedule starts after the first *re*-failure.
    pub fn enqueue(
        &self,
        hash: String,
        kind: TransactionKind,
        payload: Map<String, Value>,
        timestamp: DateTime<Utc>,
        error: String,
    ) {
        let entry = FailedTransaction {
            hash,
            kind,
            payload,
            timestamp,
            retry_count: 0,
            last_error: error,
            not_before: Instant::now(),
        };
        self.queue.lock().push_back(entry);
    }

    /// Removes and returns up to `max_items` due entries in FIFO order.
    /// Entries still inside their backoff window keep their positions.
    pub fn drain_batch(&self, max_items: usize) -> Vec<FailedTransaction> {
        let mut queue = self.queue.lock();
        let now = Instant::now();

        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(queue.len());

        while let Some(entry) = queue.pop_front() {
            if taken.len() < max_items && entry.not_before <= now {
                taken.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        *queue = kept;
        taken
    }

    /// Books a failed attempt on `entry`: bumps the retry count and either
    /// requeues it with exponential backoff or, once the retry budget is
    /// spent, moves it to the dead-letter log.
    pub fn requeue_with_backoff(&self, mut entry: FailedTransaction, error: String) {
        entry.retry_count += 1;
        entry.last_error = error;

        if entry.retry_count >= self.policy.max_retries {
            let letter = DeadLetter {
                id: Uuid::new_v4(),
                hash: entry.hash,
                kind: entry.kind,
                payload: entry.payload,
                timestamp: entry.timestamp,
                attempts: entry.retry_count,
                last_error: entry.last_error,
                failed_at: Utc::now(),
            };
            warn!(
                hash = %letter.hash,
                attempts = letter.attempts,
                error = %letter.last_error,
                "transaction exhausted retries, moved to dead-letter log"
            );
            self.dead.lock().push(letter);
            return;
        }

        // 2^n backoff, saturating so a pathological retry_count cannot
        // overflow the shift.
        let factor = 1u32.checked_shl(entry.retry_count).unwrap_or(u32::MAX);
        entry.not_before = Instant::now() + self.policy.backoff_base * factor;
        self.queue.lock().push_back(entry);
    }

    /// Entries currently awaiting retry (due or not).
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// True if a transaction with this hash is waiting for retry.
    pub fn has_pending(&self, hash: &str) -> bool {
        self.queue.lock().iter().any(|e| e.hash == hash)
    }

    /// True if a transaction with this hash was permanently failed.
    pub fn has_dead_letter(&self, hash: &str) -> bool {
        self.dead.lock().iter().any(|d| d.hash == hash)
    }

    /// Snapshot of the dead-letter log for operator inspection.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.lock().clone()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead.lock().len()
    }
}
