//! Core type definitions for ledger transactions.
//!
//! These types form the vocabulary of every record the ledger seals. The
//! wire names (`sensor_reading`, `shipment_update`, ...) are load-bearing:
//! they are mixed into the content digest, so renaming one changes every
//! hash of that kind. Don't.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::config::TIMESTAMP_FORMAT;

// ---------------------------------------------------------------------------
// TransactionKind
// ---------------------------------------------------------------------------

/// Discriminant for the domain event a transaction records.
///
/// A closed set — every record the ledger accepts falls into exactly one
/// of these categories, and the kind determines the payload shape the
/// recording operation builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// A raw sensor reading (temperature, humidity, gas levels).
    SensorReading,
    /// The output of a ripeness analysis over one crate.
    RipenessAnalysis,
    /// Creation of a shipment record.
    ShipmentCreation,
    /// A status change on an existing shipment.
    ShipmentUpdate,
    /// A quality inspection result for a shipment.
    QualityCheck,
}

impl TransactionKind {
    /// The stable wire name, as embedded in payloads and mixed into the
    /// content digest.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::SensorReading => "sensor_reading",
            Self::RipenessAnalysis => "ripeness_analysis",
            Self::ShipmentCreation => "shipment_creation",
            Self::ShipmentUpdate => "shipment_update",
            Self::QualityCheck => "quality_check",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ---------------------------------------------------------------------------
// ShipmentStatus & GeoPoint
// ---------------------------------------------------------------------------

/// Lifecycle states a shipment can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Created,
    Loading,
    InTransit,
    AtWarehouse,
    Delivered,
    Rejected,
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Loading => "loading",
            Self::InTransit => "in_transit",
            Self::AtWarehouse => "at_warehouse",
            Self::Delivered => "delivered",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// A WGS-84 coordinate pair attached to shipment status updates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Formats a timestamp in the ledger's fixed-width ISO-8601 form.
///
/// Every timestamp string the ledger emits goes through here, which is
/// what makes the lexicographic date comparisons in report filtering
/// legitimate.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A sealed, tamper-evident record of one domain event.
///
/// Immutable once sealed. `hash` is the content digest of `(kind, payload)`
/// and serves as the transaction's identity everywhere — store keys,
/// caller receipts, verification lookups. The payload here is the stored
/// form: sensitive fields are already sealed, so serializing a
/// `Transaction` never leaks a credential.
///
/// `merkle_root` is a snapshot over the insertion-ordered prefix of the
/// ledger ending at this transaction (see `sequence`); later records never
/// invalidate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The domain event category.
    pub kind: TransactionKind,

    /// The stored payload, sealed fields included.
    pub payload: Map<String, Value>,

    /// Event time (UTC). Also embedded in the payload as a fixed-width
    /// ISO-8601 string under `"timestamp"`.
    pub timestamp: DateTime<Utc>,

    /// Monotonic insertion index assigned at sealing time. Orders the
    /// Merkle prefix and breaks timestamp ties in queries.
    pub sequence: u64,

    /// Content digest (hex BLAKE3) of `(kind, payload)`. The transaction's
    /// identity.
    pub hash: String,

    /// Ed25519 signature (hex) over the canonical payload serialization.
    pub signature: String,

    /// Public key (hex) of the generation that signed. Embedded so
    /// verification survives key rotation for the retention window.
    pub signer_public_key: String,

    /// Key generation counter at signing time.
    pub key_generation: u64,

    /// Merkle root (hex) over the ledger prefix ending at this transaction.
    pub merkle_root: String,
}

impl Transaction {
    /// The fixed-width ISO-8601 form of the event timestamp.
    pub fn timestamp_iso(&self) -> String {
        format_timestamp(&self.timestamp)
    }

    /// True if the payload carries `key == want`, either as a direct
    /// top-level field or inside any nested detail object one level down.
    pub fn payload_field_matches(&self, key: &str, want: &str) -> bool {
        payload_field_matches(&self.payload, key, want)
    }
}

/// Field matching shared by the history and report queries: direct fields
/// first, then one level of nested objects (`{"details": {"shipment_id":
/// ...}}` is a shape the web layer produces).
pub fn payload_field_matches(payload: &Map<String, Value>, key: &str, want: &str) -> bool {
    if payload.get(key).and_then(Value::as_str) == Some(want) {
        return true;
    }
    payload.values().any(|value| {
        value
            .as_object()
            .and_then(|nested| nested.get(key))
            .and_then(Value::as_str)
            == Some(want)
    })
}

// ---------------------------------------------------------------------------
// Receipts & Reports
// ---------------------------------------------------------------------------

/// How a `record_*` call left the building.
///
/// Callers must not assume synchronous durability: `QueuedForRetry` and
/// `Batched` mean the transaction hash is valid and final, but submission
/// happens later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPath {
    /// Sealed and submitted (stored locally or accepted remotely).
    Submitted,
    /// Submission failed; the payload sits in the retry queue.
    QueuedForRetry,
    /// Buffered in the sensor batch; sealed and submitted at flush.
    Batched,
}

impl fmt::Display for SubmissionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::QueuedForRetry => write!(f, "queued_for_retry"),
            Self::Batched => write!(f, "batched"),
        }
    }
}

/// Receipt returned by every `record_*` operation: the content hash (the
/// record's permanent identifier) and the path it took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReceipt {
    pub hash: String,
    pub path: SubmissionPath,
}

/// Result of verifying a stored transaction.
///
/// `verified` holds only when both the signature and the Merkle root
/// check out. `payload` is the decrypted payload on success; `None`
/// when the transaction is unknown or decryption failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub verified: bool,
    pub payload: Option<Map<String, Value>>,
    pub signature_valid: bool,
    pub merkle_root_valid: bool,
}

impl VerificationReport {
    /// The all-false report for unknown or undecryptable transactions.
    pub fn failed() -> Self {
        Self {
            verified: false,
            payload: None,
            signature_valid: false,
            merkle_root_valid: false,
        }
    }
}

/// Where a transaction currently stands, queryable by hash. The answer to
/// "my record_* call returned QueuedForRetry — did it ever make it?"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Present in the local store.
    Stored,
    /// Waiting in the sensor batch buffer for the next flush.
    Buffered,
    /// Waiting in the retry queue for another submission attempt.
    PendingRetry,
    /// Exhausted its retries; resides in the dead-letter log.
    Failed,
    /// Never seen, or expired out of the local cache.
    Unknown,
}

/// Optional, conjunctive filters for [`LedgerReport`] generation. Date
/// bounds are fixed-width ISO-8601 strings compared lexicographically —
/// valid because every ledger timestamp uses the same format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub shipment_id: Option<String>,
    pub crate_id: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// A filtered, timestamp-ordered slice of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerReport {
    pub transactions: Vec<Transaction>,
    pub total_count: usize,
    pub generated_at: String,
}

/// Operational snapshot of the ledger service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStatus {
    /// True only in remote mode with a reachable chain client.
    pub connected: bool,
    /// Transactions currently held in the local store.
    pub total_transactions: usize,
    /// Domain events accepted since startup (including batched and
    /// queued-for-retry ones).
    pub total_events: u64,
    /// Entries in the dead-letter log.
    pub dead_letters: usize,
    /// Hex public key of the active signing generation.
    pub active_public_key: String,
    /// Active key generation counter.
    pub key_generation: u64,
}
