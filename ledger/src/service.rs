//! # Ledger Service
//!
//! The orchestrator. Domain collaborators (sensor network, ripeness
//! analyzer, route optimizer, web layer) call the `record_*` operations;
//! everything cryptographic, storage-related, and failure-related happens
//! behind this facade.
//!
//! ## The recording pipeline
//!
//! Every `record_*` call walks the same path:
//!
//! 1. Build the payload from caller fields; attach `type` and `timestamp`.
//! 2. Seal sensitive fields (key names matching the credential heuristic)
//!    under the process-lifetime field key.
//! 3. Seal the transaction: content hash, signature, and a Merkle snapshot
//!    over the ledger prefix ending at this transaction.
//! 4. Dispatch — the sealed transaction lands in the local store (the
//!    system of record in local mode, a query cache in remote mode), and
//!    in remote mode is forwarded to the chain client under a hard
//!    timeout.
//! 5. On a recoverable failure the cache entry is rolled back and the
//!    frozen payload parked in the retry queue; the receipt distinguishes
//!    `Submitted` from `QueuedForRetry`. Callers must not assume
//!    synchronous durability.
//! 6. Either way, the caller gets the content hash — the record's
//!    permanent identifier.
//!
//! Because the hash is a pure function of `(kind, payload)` and the
//! payload is frozen before the first attempt, a retried transaction
//! keeps the hash its caller already holds.
//!
//! ## Batching
//!
//! `record_sensor_data` optionally buffers readings and flushes them as a
//! group once the buffer reaches the configured size, amortizing the
//! signing and Merkle cost for high-frequency feeds. Each member of a
//! flush succeeds or fails independently — partial success is normal
//! operation, not an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{LedgerConfig, AES_KEY_LENGTH, SENSITIVE_KEY_MARKERS};
use crate::crypto::encryption::{self, EncryptionError};
use crate::crypto::kdf::{self, KdfError};
use crate::crypto::keys::KeyError;
use crate::crypto::CryptoEngine;
use crate::remote::{LedgerMode, RemoteChainClient, SubmissionError};
use crate::retry::{DeadLetter, RetryPolicy, RetryQueue};
use crate::store::TransactionStore;
use crate::transaction::{
    format_timestamp, GeoPoint, LedgerReport, LedgerStatus, RecordReceipt, ReportFilter,
    ShipmentStatus, SubmissionPath, Transaction, TransactionKind, TransactionState,
    VerificationReport,
};

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Failures surfaced by ledger operations.
///
/// The split matters operationally: `Submission` is recoverable and routed
/// to the retry queue; everything else is fatal to the single call that
/// produced it and is never retried.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The payload could not be prepared for sealing. Fatal to this call.
    #[error("payload cannot be encoded: {0}")]
    Encoding(String),

    /// A signature or AEAD tag failed verification. Surfaced as
    /// `verified: false` by the query paths; never treated as success.
    #[error("cryptographic integrity failure")]
    CryptoIntegrity,

    /// The remote chain was unreachable, rejected the transaction, or
    /// timed out. Recoverable via the retry queue.
    #[error("submission failed: {0}")]
    Submission(String),

    /// Deriving the field-encryption key failed at construction.
    #[error("field key derivation failed")]
    KeyDerivation(#[from] KdfError),

    /// Public key export failed.
    #[error("public key export failed")]
    KeyExport(#[from] KeyError),
}

impl LedgerError {
    /// True for failures the retry worker should re-attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Submission(_))
    }
}

impl From<SubmissionError> for LedgerError {
    fn from(err: SubmissionError) -> Self {
        Self::Submission(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// LedgerService
// ---------------------------------------------------------------------------

/// A sensor reading waiting in the batch buffer. The payload is fully
/// built and sealed; only signing, the Merkle snapshot, and dispatch are
/// deferred to the flush.
struct BufferedReading {
    payload: Map<String, Value>,
    timestamp: DateTime<Utc>,
    hash: String,
}

/// The cryptographically-secured event ledger.
///
/// Thread-safe throughout: `record_*` calls arrive from collaborator
/// threads while the background workers drain the retry queue and rotate
/// keys. Each shared structure carries its own lock; the sequence and
/// event counters are atomics.
pub struct LedgerService {
    engine: Arc<CryptoEngine>,
    store: Arc<TransactionStore>,
    retry: Arc<RetryQueue>,
    remote: Option<Arc<dyn RemoteChainClient>>,
    mode: LedgerMode,
    field_key: [u8; AES_KEY_LENGTH],
    next_sequence: AtomicU64,
    total_events: AtomicU64,
    sensor_batch: Mutex<Vec<BufferedReading>>,
    /// Serializes sealing + store insertion so Merkle snapshots always see
    /// a consistent prefix. Never held across an await.
    seal_lock: Mutex<()>,
    config: LedgerConfig,
}

impl LedgerService {
    /// Builds a local-mode ledger: the in-memory store is the system of
    /// record.
    pub fn local(config: LedgerConfig) -> Result<Self, LedgerError> {
        Self::build(config, LedgerMode::Local, None)
    }

    /// Builds a remote-mode ledger that forwards sealed transactions to
    /// the given chain client, keeping a non-authoritative local cache
    /// for queries.
    pub fn with_remote(
        config: LedgerConfig,
        client: Arc<dyn RemoteChainClient>,
    ) -> Result<Self, LedgerError> {
        Self::build(config, LedgerMode::Remote, Some(client))
    }

    fn build(
        config: LedgerConfig,
        mode: LedgerMode,
        remote: Option<Arc<dyn RemoteChainClient>>,
    ) -> Result<Self, LedgerError> {
        // The field key is derived exactly once and cached for the process
        // lifetime; the Argon2 cost is paid here, not per transaction.
        let salt = kdf::generate_salt();
        let field_key = kdf::derive_key(config.field_secret.as_bytes(), &salt)?;

        let engine = Arc::new(CryptoEngine::new(&config));
        let store = Arc::new(TransactionStore::new(config.cache_ttl));
        let retry = Arc::new(RetryQueue::new(RetryPolicy {
            max_retries: config.max_retries,
            backoff_base: config.retry_backoff_base,
        }));

        info!(%mode, ttl_secs = config.cache_ttl.as_secs(), "ledger service initialized");

        Ok(Self {
            engine,
            store,
            retry,
            remote,
            mode,
            field_key,
            next_sequence: AtomicU64::new(0),
            total_events: AtomicU64::new(0),
            sensor_batch: Mutex::new(Vec::new()),
            seal_lock: Mutex::new(()),
            config,
        })
    }

    // -- recording operations ----------------------------------------------

    /// Records a sensor reading. With batching enabled (see
    /// [`LedgerConfig::sensor_batch_size`]) the reading is buffered and
    /// the receipt reports `Batched`; the content hash is final either way.
    pub async fn record_sensor_data(
        &self,
        sensor_id: &str,
        data: Map<String, Value>,
    ) -> Result<RecordReceipt, LedgerError> {
        let timestamp = Utc::now();
        let mut payload = Map::new();
        payload.insert("sensor_id".into(), Value::String(sensor_id.to_string()));
        payload.insert("data".into(), Value::Object(data));
        self.finish_payload(&mut payload, TransactionKind::SensorReading, &timestamp)?;

        self.total_events.fetch_add(1, Ordering::Relaxed);

        if self.config.sensor_batch_size > 1 {
            let hash = self
                .engine
                .hash_transaction(TransactionKind::SensorReading.wire_name(), &payload);

            let should_flush = {
                let mut batch = self.sensor_batch.lock();
                batch.push(BufferedReading {
                    payload,
                    timestamp,
                    hash: hash.clone(),
                });
                batch.len() >= self.config.sensor_batch_size
            };
            debug!(sensor_id, hash = %hash, "sensor reading buffered");

            if should_flush {
                self.flush_sensor_batch().await;
            }
            return Ok(RecordReceipt {
                hash,
                path: SubmissionPath::Batched,
            });
        }

        self.submit_payload(TransactionKind::SensorReading, payload, timestamp)
            .await
    }

    /// Records a ripeness analysis result for one crate.
    pub async fn record_ripeness_analysis(
        &self,
        crate_id: &str,
        result: Map<String, Value>,
    ) -> Result<RecordReceipt, LedgerError> {
        let timestamp = Utc::now();
        let mut payload = Map::new();
        payload.insert("crate_id".into(), Value::String(crate_id.to_string()));
        payload.insert("analysis".into(), Value::Object(result));
        self.finish_payload(&mut payload, TransactionKind::RipenessAnalysis, &timestamp)?;

        self.total_events.fetch_add(1, Ordering::Relaxed);
        self.submit_payload(TransactionKind::RipenessAnalysis, payload, timestamp)
            .await
    }

    /// Creates a shipment record from caller-supplied shipment fields.
    pub async fn create_shipment_record(
        &self,
        data: Map<String, Value>,
    ) -> Result<RecordReceipt, LedgerError> {
        let timestamp = Utc::now();
        let mut payload = data;
        self.finish_payload(&mut payload, TransactionKind::ShipmentCreation, &timestamp)?;

        self.total_events.fetch_add(1, Ordering::Relaxed);
        self.submit_payload(TransactionKind::ShipmentCreation, payload, timestamp)
            .await
    }

    /// Records a status change on an existing shipment, with optional
    /// coordinates.
    pub async fn update_shipment_status(
        &self,
        shipment_id: &str,
        status: ShipmentStatus,
        location: Option<GeoPoint>,
    ) -> Result<RecordReceipt, LedgerError> {
        let timestamp = Utc::now();
        let mut payload = Map::new();
        payload.insert("shipment_id".into(), Value::String(shipment_id.to_string()));
        payload.insert("status".into(), Value::String(status.to_string()));
        payload.insert(
            "location".into(),
            location
                .and_then(|loc| serde_json::to_value(loc).ok())
                .unwrap_or(Value::Null),
        );
        self.finish_payload(&mut payload, TransactionKind::ShipmentUpdate, &timestamp)?;

        self.total_events.fetch_add(1, Ordering::Relaxed);
        self.submit_payload(TransactionKind::ShipmentUpdate, payload, timestamp)
            .await
    }

    /// Records a quality inspection result for a shipment.
    pub async fn record_quality_check(
        &self,
        shipment_id: &str,
        data: Map<String, Value>,
    ) -> Result<RecordReceipt, LedgerError> {
        let timestamp = Utc::now();
        let mut payload = Map::new();
        payload.insert("shipment_id".into(), Value::String(shipment_id.to_string()));
        payload.insert("quality_data".into(), Value::Object(data));
        self.finish_payload(&mut payload, TransactionKind::QualityCheck, &timestamp)?;

        self.total_events.fetch_add(1, Ordering::Relaxed);
        self.submit_payload(TransactionKind::QualityCheck, payload, timestamp)
            .await
    }

    /// Drains the sensor batch buffer, sealing and dispatching every
    /// buffered reading independently. Returns how many were processed.
    /// Failures land in the retry queue; they do not abort the flush.
    pub async fn flush_sensor_batch(&self) -> usize {
        let buffered: Vec<BufferedReading> = std::mem::take(&mut *self.sensor_batch.lock());
        if buffered.is_empty() {
            return 0;
        }

        let count = buffered.len();
        info!(count, "flushing sensor batch");

        for reading in buffered {
            match self
                .submit_payload(TransactionKind::SensorReading, reading.payload, reading.timestamp)
                .await
            {
                Ok(receipt) => {
                    debug_assert_eq!(receipt.hash, reading.hash);
                    debug!(hash = %receipt.hash, path = %receipt.path, "batched reading processed");
                }
                Err(e) => {
                    // Non-retryable failure of a single member. The batch
                    // carries on; partial success is expected.
                    warn!(hash = %reading.hash, error = %e, "batched reading failed");
                }
            }
        }
        count
    }

    // -- pipeline internals -------------------------------------------------

    /// Steps 1b–2 of the pipeline: attach `type` and `timestamp`, then
    /// seal sensitive fields. After this the payload is frozen.
    fn finish_payload(
        &self,
        payload: &mut Map<String, Value>,
        kind: TransactionKind,
        timestamp: &DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        payload.insert("type".into(), Value::String(kind.wire_name().to_string()));
        payload.insert(
            "timestamp".into(),
            Value::String(format_timestamp(timestamp)),
        );
        seal_sensitive_fields(payload, &self.field_key)
            .map_err(|e| LedgerError::Encoding(e.to_string()))
    }

    /// Step 3: content hash, signature, sequence, Merkle snapshot — and the
    /// store insertion, atomically.
    ///
    /// The seal lock serializes sequence assignment, snapshot computation,
    /// and the store write. Without it, a transaction sealed between
    /// another's snapshot and its store insertion would verify against a
    /// prefix the snapshot never saw. No await happens under the lock;
    /// remote submission runs after it is released.
    fn seal_and_store(
        &self,
        kind: TransactionKind,
        payload: Map<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> Transaction {
        let _guard = self.seal_lock.lock();

        let hash = self.engine.hash_transaction(kind.wire_name(), &payload);
        let envelope = self.engine.sign_payload(&payload);
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);

        // The snapshot covers everything currently stored plus this
        // transaction. All stored sequences are smaller than ours, so the
        // prefix is reproducible later from the sequence number alone.
        // Re-recording identical content keeps a single leaf: the set
        // already contains this hash.
        let mut leaves = self.store.hashes_up_to_sequence(sequence);
        if !leaves.contains(&hash) {
            leaves.push(hash.clone());
        }
        let merkle_root = self.engine.merkle_root(&leaves);

        let transaction = Transaction {
            kind,
            payload,
            timestamp,
            sequence,
            hash,
            signature: envelope.signature,
            signer_public_key: envelope.public_key,
            key_generation: envelope.generation,
            merkle_root,
        };
        self.store.put(transaction.clone());
        transaction
    }

    /// Step 4 for remote mode: forward under a hard timeout. `Ok` in local
    /// mode — the store insertion already happened in [`seal_and_store`].
    async fn forward_remote(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        let Some(client) = &self.remote else {
            return Ok(());
        };
        match tokio::time::timeout(self.config.remote_timeout, client.submit(transaction)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SubmissionError::Timeout(self.config.remote_timeout).into()),
        }
    }

    /// Steps 3–6 for an already-frozen payload.
    async fn submit_payload(
        &self,
        kind: TransactionKind,
        payload: Map<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> Result<RecordReceipt, LedgerError> {
        let transaction = self.seal_and_store(kind, payload, timestamp);
        let hash = transaction.hash.clone();

        match self.forward_remote(&transaction).await {
            Ok(()) => {
                debug!(%kind, hash = %hash, seq = transaction.sequence, "transaction recorded");
                Ok(RecordReceipt {
                    hash,
                    path: SubmissionPath::Submitted,
                })
            }
            Err(e) if e.is_retryable() => {
                // Roll back the optimistic cache entry — an unsubmitted
                // transaction must not satisfy history or verification
                // queries — and park the payload for the retry worker.
                self.store.remove(&hash);
                warn!(%kind, hash = %hash, error = %e, "submission failed, queued for retry");
                self.retry.enqueue(
                    hash.clone(),
                    kind,
                    transaction.payload,
                    timestamp,
                    e.to_string(),
                );
                Ok(RecordReceipt {
                    hash,
                    path: SubmissionPath::QueuedForRetry,
                })
            }
            Err(e) => {
                self.store.remove(&hash);
                Err(e)
            }
        }
    }

    // -- worker entry points ------------------------------------------------

    /// Drains one bounded batch from the retry queue and re-attempts each
    /// entry. Returns the number of entries attempted. Called by the retry
    /// worker; safe to call manually in tests.
    pub async fn process_retry_batch(&self) -> usize {
        let batch = self.retry.drain_batch(self.config.retry_batch_size);
        let attempted = batch.len();

        for entry in batch {
            let transaction =
                self.seal_and_store(entry.kind, entry.payload.clone(), entry.timestamp);
            match self.forward_remote(&transaction).await {
                Ok(()) => {
                    info!(
                        hash = %transaction.hash,
                        attempts = entry.retry_count + 1,
                        "queued transaction submitted on retry"
                    );
                }
                Err(e) => {
                    self.store.remove(&transaction.hash);
                    let reason = e.to_string();
                    self.retry.requeue_with_backoff(entry, reason);
                }
            }
        }
        attempted
    }

    /// Evicts expired entries from the local store. The retry worker calls
    /// this as the periodic sweep; `get` applies the same age test lazily.
    pub fn cleanup_expired(&self) -> usize {
        self.store.cleanup_expired()
    }

    /// Rotates the signing key if the rotation period has elapsed.
    /// Returns the retired public key when a rotation happened.
    pub fn rotate_keys_if_due(&self) -> Option<String> {
        self.engine.rotate_if_due()
    }

    /// Rotates the signing key immediately, ignoring the schedule.
    /// Returns the retired public key. Operator escape hatch for key
    /// compromise; the rotation worker handles the routine case.
    pub fn rotate_keys_now(&self) -> String {
        self.engine.rotate_keys()
    }

    // -- query operations ---------------------------------------------------

    /// Verifies a stored transaction by hash.
    ///
    /// Decryption of sealed fields is a gate: if the engine cannot open
    /// them, the report is all-false — no exception, no partial trust.
    /// The signature is checked over the stored (sealed) payload — the
    /// bytes that were actually signed — and the Merkle root is recomputed
    /// over the currently-stored prefix ending at the transaction's
    /// sequence. The decrypted payload is returned only on full success.
    pub fn verify_transaction(&self, hash: &str) -> VerificationReport {
        let Some(transaction) = self.store.get(hash) else {
            return VerificationReport::failed();
        };

        let opened = match open_sealed_fields(&transaction.payload, &self.field_key) {
            Ok(payload) => payload,
            Err(_) => return VerificationReport::failed(),
        };

        let signature_valid = self.engine.verify_payload(
            &transaction.payload,
            &transaction.signature,
            &transaction.signer_public_key,
        );

        let leaves = self.store.hashes_up_to_sequence(transaction.sequence);
        let merkle_root_valid = self.engine.merkle_root(&leaves) == transaction.merkle_root;

        let verified = signature_valid && merkle_root_valid;
        VerificationReport {
            verified,
            payload: verified.then_some(opened),
            signature_valid,
            merkle_root_valid,
        }
    }

    /// Complete history of a shipment, timestamp ascending.
    pub fn get_shipment_history(&self, shipment_id: &str) -> Vec<Transaction> {
        self.store
            .query(|tx| tx.payload_field_matches("shipment_id", shipment_id))
    }

    /// Complete history of a crate, timestamp ascending.
    pub fn get_crate_history(&self, crate_id: &str) -> Vec<Transaction> {
        self.store
            .query(|tx| tx.payload_field_matches("crate_id", crate_id))
    }

    /// Builds a filtered report. All filters are optional and conjunctive;
    /// date bounds compare fixed-width ISO-8601 strings lexicographically.
    pub fn generate_report(&self, filter: &ReportFilter) -> LedgerReport {
        let transactions = self.store.query(|tx| {
            let ts = tx.timestamp_iso();
            if let Some(start) = &filter.start {
                if ts.as_str() < start.as_str() {
                    return false;
                }
            }
            if let Some(end) = &filter.end {
                if ts.as_str() > end.as_str() {
                    return false;
                }
            }
            if let Some(shipment_id) = &filter.shipment_id {
                if !tx.payload_field_matches("shipment_id", shipment_id) {
                    return false;
                }
            }
            if let Some(crate_id) = &filter.crate_id {
                if !tx.payload_field_matches("crate_id", crate_id) {
                    return false;
                }
            }
            true
        });

        LedgerReport {
            total_count: transactions.len(),
            transactions,
            generated_at: format_timestamp(&Utc::now()),
        }
    }

    /// Operational snapshot: connectivity, counts, active public key.
    pub async fn get_status(&self) -> LedgerStatus {
        let connected = match &self.remote {
            Some(client) => client.is_connected().await,
            None => false,
        };

        LedgerStatus {
            connected,
            total_transactions: self.store.len(),
            total_events: self.total_events.load(Ordering::Relaxed),
            dead_letters: self.retry.dead_letter_count(),
            active_public_key: self.engine.active_public_key_hex(),
            key_generation: self.engine.active_generation(),
        }
    }

    /// Where a transaction currently stands, by hash. The poll-by-hash
    /// companion to the fire-and-forget retry path.
    pub fn get_transaction_status(&self, hash: &str) -> TransactionState {
        if self.store.get(hash).is_some() {
            return TransactionState::Stored;
        }
        if self.sensor_batch.lock().iter().any(|r| r.hash == hash) {
            return TransactionState::Buffered;
        }
        if self.retry.has_pending(hash) {
            return TransactionState::PendingRetry;
        }
        if self.retry.has_dead_letter(hash) {
            return TransactionState::Failed;
        }
        TransactionState::Unknown
    }

    /// SPKI PEM of the active public key, for external verifiers.
    pub fn export_public_key_pem(&self) -> Result<String, LedgerError> {
        Ok(self.engine.export_public_key_pem()?)
    }

    /// Snapshot of the dead-letter log.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.retry.dead_letters()
    }

    /// The mode fixed at construction.
    pub fn mode(&self) -> LedgerMode {
        self.mode
    }

    /// The configuration this service was built with.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Readings currently waiting in the sensor batch buffer.
    pub fn pending_sensor_batch(&self) -> usize {
        self.sensor_batch.lock().len()
    }

    /// Entries currently waiting in the retry queue.
    pub fn pending_retries(&self) -> usize {
        self.retry.len()
    }
}

// ---------------------------------------------------------------------------
// Sensitive-field sealing
// ---------------------------------------------------------------------------

/// True if a payload key matches the credential heuristic.
fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_lowercase();
    SENSITIVE_KEY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Walks a payload and seals every value under a sensitive key, at any
/// nesting depth. Values that already carry the sealed shape are left
/// alone, which makes the walk idempotent — a retried payload is not
/// double-sealed.
fn seal_sensitive_fields(
    payload: &mut Map<String, Value>,
    key: &[u8; AES_KEY_LENGTH],
) -> Result<(), EncryptionError> {
    for (field, value) in payload.iter_mut() {
        if is_sensitive_key(field) {
            if !encryption::is_sealed_value(value) {
                *value = encryption::seal_value(key, value)?;
            }
        } else {
            seal_nested(value, key)?;
        }
    }
    Ok(())
}

fn seal_nested(value: &mut Value, key: &[u8; AES_KEY_LENGTH]) -> Result<(), EncryptionError> {
    match value {
        Value::Object(map) => seal_sensitive_fields(map, key),
        Value::Array(items) => {
            for item in items {
                seal_nested(item, key)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Walks a stored payload and opens every sealed value back to plaintext.
/// Any failure aborts the walk — a payload that cannot be fully opened is
/// not partially trusted.
fn open_sealed_fields(
    payload: &Map<String, Value>,
    key: &[u8; AES_KEY_LENGTH],
) -> Result<Map<String, Value>, EncryptionError> {
    let mut opened = Map::new();
    for (field, value) in payload {
        opened.insert(field.clone(), open_nested(value, key)?);
    }
    Ok(opened)
}

fn open_nested(value: &Value, key: &[u8; AES_KEY_LENGTH]) -> Result<Value, EncryptionError> {
    if encryption::is_sealed_value(value) {
        return encryption::open_value(key, value);
    }
    match value {
        Value::Object(map) => Ok(Value::Object(open_sealed_fields(map, key)?)),
        Value::Array(items) => {
            let opened: Result<Vec<Value>, EncryptionError> =
                items.iter().map(|item| open_nested(item, key)).collect();
            Ok(Value::Array(opened?))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn test_field_key() -> [u8; AES_KEY_LENGTH] {
        let mut key = [0u8; AES_KEY_LENGTH];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn sensitive_key_heuristic() {
        assert!(is_sensitive_key("password"));
        assert!(is_sensitive_key("API_TOKEN"));
        assert!(is_sensitive_key("secret_token"));
        assert!(is_sensitive_key("gateway_key"));
        assert!(!is_sensitive_key("temperature"));
        assert!(!is_sensitive_key("shipment_id"));
    }

    #[test]
    fn sealing_replaces_sensitive_values_and_opening_restores_them() {
        let key = test_field_key();
        let mut payload = map(json!({
            "sensor_id": "S1",
            "secret_token": "abc",
            "data": {"temperature": 4.0, "access_key": "k-123"}
        }));

        seal_sensitive_fields(&mut payload, &key).unwrap();

        // Top-level and nested sensitive values are sealed; the plaintext
        // is gone from the stored representation.
        assert!(encryption::is_sealed_value(&payload["secret_token"]));
        assert!(encryption::is_sealed_value(&payload["data"]["access_key"]));
        // Quoted forms cannot appear inside base64 ciphertext, so these
        // checks are deterministic.
        let serialized = serde_json::to_string(&payload).unwrap();
        assert!(!serialized.contains("\"abc\""));
        assert!(!serialized.contains("\"k-123\""));
        // Non-sensitive fields are untouched.
        assert_eq!(payload["data"]["temperature"], json!(4.0));

        let opened = open_sealed_fields(&payload, &key).unwrap();
        assert_eq!(opened["secret_token"], json!("abc"));
        assert_eq!(opened["data"]["access_key"], json!("k-123"));
    }

    #[test]
    fn sealing_is_idempotent() {
        let key = test_field_key();
        let mut payload = map(json!({"secret": "s3cr3t"}));
        seal_sensitive_fields(&mut payload, &key).unwrap();
        let once = payload.clone();

        seal_sensitive_fields(&mut payload, &key).unwrap();
        assert_eq!(payload, once);
    }

    #[test]
    fn opening_with_wrong_key_fails() {
        let key = test_field_key();
        let mut payload = map(json!({"secret": "s3cr3t"}));
        seal_sensitive_fields(&mut payload, &key).unwrap();

        let mut wrong = key;
        wrong[0] ^= 0xFF;
        assert!(open_sealed_fields(&payload, &wrong).is_err());
    }

    #[tokio::test]
    async fn record_returns_deterministic_hash_identity() {
        let service = LedgerService::local(LedgerConfig {
            sensor_batch_size: 1,
            ..LedgerConfig::default()
        })
        .unwrap();

        let receipt = service
            .record_sensor_data("S1", map(json!({"temperature": 4.0})))
            .await
            .unwrap();
        assert_eq!(receipt.path, SubmissionPath::Submitted);
        assert_eq!(
            service.get_transaction_status(&receipt.hash),
            TransactionState::Stored
        );
    }

    #[tokio::test]
    async fn report_filters_are_conjunctive() {
        let service = LedgerService::local(LedgerConfig {
            sensor_batch_size: 1,
            ..LedgerConfig::default()
        })
        .unwrap();

        service
            .record_quality_check("SHIP-1", map(json!({"grade": "A"})))
            .await
            .unwrap();
        service
            .record_quality_check("SHIP-2", map(json!({"grade": "B"})))
            .await
            .unwrap();
        service
            .record_ripeness_analysis("CRT-1", map(json!({"score": 0.8})))
            .await
            .unwrap();

        let all = service.generate_report(&ReportFilter::default());
        assert_eq!(all.total_count, 3);

        let ship1 = service.generate_report(&ReportFilter {
            shipment_id: Some("SHIP-1".into()),
            ..ReportFilter::default()
        });
        assert_eq!(ship1.total_count, 1);

        // Conjunction: a shipment filter AND a crate filter match nothing
        // because no transaction carries both ids.
        let both = service.generate_report(&ReportFilter {
            shipment_id: Some("SHIP-1".into()),
            crate_id: Some("CRT-1".into()),
            ..ReportFilter::default()
        });
        assert_eq!(both.total_count, 0);

        // A future start date excludes everything.
        let future = service.generate_report(&ReportFilter {
            start: Some("2999-01-01T00:00:00.000000Z".into()),
            ..ReportFilter::default()
        });
        assert_eq!(future.total_count, 0);
    }

    #[tokio::test]
    async fn batch_buffers_until_threshold() {
        let service = LedgerService::local(LedgerConfig {
            sensor_batch_size: 3,
            ..LedgerConfig::default()
        })
        .unwrap();

        let mut receipts = Vec::new();
        for i in 0..2 {
            let receipt = service
                .record_sensor_data("S1", map(json!({"reading": i})))
                .await
                .unwrap();
            assert_eq!(receipt.path, SubmissionPath::Batched);
            receipts.push(receipt);
        }
        assert_eq!(service.pending_sensor_batch(), 2);
        let status = service.get_status().await;
        assert_eq!(status.total_transactions, 0);
        // Buffered hashes are resolvable while they wait for the flush.
        assert_eq!(
            service.get_transaction_status(&receipts[0].hash),
            TransactionState::Buffered
        );

        // The third reading crosses the threshold and flushes the batch.
        let last = service
            .record_sensor_data("S1", map(json!({"reading": 2})))
            .await
            .unwrap();
        assert_eq!(service.pending_sensor_batch(), 0);
        let status = service.get_status().await;
        assert_eq!(status.total_transactions, 3);
        assert_eq!(status.total_events, 3);
        for receipt in receipts.iter().chain(std::iter::once(&last)) {
            assert_eq!(
                service.get_transaction_status(&receipt.hash),
                TransactionState::Stored
            );
        }
    }

    #[tokio::test]
    async fn batched_hash_matches_sealed_hash() {
        let service = LedgerService::local(LedgerConfig {
            sensor_batch_size: 2,
            ..LedgerConfig::default()
        })
        .unwrap();

        let first = service
            .record_sensor_data("S1", map(json!({"reading": 1})))
            .await
            .unwrap();
        service
            .record_sensor_data("S1", map(json!({"reading": 2})))
            .await
            .unwrap();

        // After the flush, the hash handed out at buffer time must resolve
        // to a stored transaction.
        assert_eq!(
            service.get_transaction_status(&first.hash),
            TransactionState::Stored
        );
    }

    #[tokio::test]
    async fn status_reports_local_mode_disconnected() {
        let service = LedgerService::local(LedgerConfig::default()).unwrap();
        let status = service.get_status().await;
        assert!(!status.connected);
        assert_eq!(status.key_generation, 0);
        assert_eq!(status.active_public_key.len(), 64);
    }
}
